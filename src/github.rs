use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const DEFAULT_API_ROOT: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("mend/", env!("CARGO_PKG_VERSION"));
const MEDIA_JSON: &str = "application/vnd.github.v3+json";
const MEDIA_DIFF: &str = "application/vnd.github.v3.diff";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Abstraction over the HTTP layer for testability.
pub trait Transport {
    fn get(&self, path: &str, accept: &str) -> Result<String>;
    fn post(&self, path: &str, body: &serde_json::Value) -> Result<String>;
}

/// Real transport over `ureq` with retry and exponential backoff.
struct UreqTransport {
    api_root: String,
    token: String,
}

impl UreqTransport {
    fn new(token: &str) -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }
}

/// Only retry rate-limits (429), server errors (5xx), and transport errors.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

fn with_backoff<F>(f: F) -> Result<String>
where
    F: Fn() -> std::result::Result<ureq::Response, Box<ureq::Error>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    for attempt in 1..=MAX_RETRIES {
        match f() {
            Ok(response) => {
                return response
                    .into_string()
                    .map_err(|e| Error::RemoteAccess(format!("failed to read response: {e}")));
            }
            Err(ref e) if attempt < MAX_RETRIES && is_retryable(e) => {
                warn!(
                    attempt,
                    error = %e,
                    backoff_ms,
                    "retrying github request after transient error"
                );
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
            }
            Err(e) => return Err(Error::RemoteAccess(format!("github request failed: {e}"))),
        }
    }
    unreachable!()
}

impl Transport for UreqTransport {
    fn get(&self, path: &str, accept: &str) -> Result<String> {
        let url = self.url(path);
        with_backoff(|| {
            ureq::get(&url)
                .set("Authorization", &format!("token {}", self.token))
                .set("Accept", accept)
                .set("User-Agent", USER_AGENT)
                .call()
                .map_err(Box::new)
        })
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<String> {
        let url = self.url(path);
        with_backoff(|| {
            ureq::post(&url)
                .set("Authorization", &format!("token {}", self.token))
                .set("Accept", MEDIA_JSON)
                .set("User-Agent", USER_AGENT)
                .send_json(body)
                .map_err(Box::new)
        })
    }
}

// --- API types ---

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GhUser {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GhRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

/// Pull request metadata, as much of it as the handlers need.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrDetails {
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub user: GhUser,
    pub head: GhRef,
    pub base: GhRef,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub draft: bool,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changes: u64,
    #[serde(default)]
    pub patch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommentRecord {
    pub id: u64,
    pub body: String,
    pub user: GhUser,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepoInfo {
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// GitHub REST client scoped to the operations the bot performs.
pub struct GitHubClient {
    client: Box<dyn Transport>,
}

impl GitHubClient {
    pub fn new(token: &str) -> Self {
        Self {
            client: Box::new(UreqTransport::new(token)),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_transport(client: Box<dyn Transport>) -> Self {
        Self { client }
    }

    /// Verify the token by fetching the authenticated user. Returns the login.
    pub fn verify_token(&self) -> Result<String> {
        let json = self.client.get("/user", MEDIA_JSON)?;
        let user: GhUser = parse(&json, "user")?;
        debug!(login = %user.login, "token verified");
        Ok(user.login)
    }

    pub fn get_repo_info(&self, owner: &str, repo: &str) -> Result<RepoInfo> {
        let json = self.client.get(&format!("/repos/{owner}/{repo}"), MEDIA_JSON)?;
        parse(&json, "repo info")
    }

    pub fn fetch_pr_details(&self, owner: &str, repo: &str, pr_number: u64) -> Result<PrDetails> {
        let json = self
            .client
            .get(&format!("/repos/{owner}/{repo}/pulls/{pr_number}"), MEDIA_JSON)?;
        let details: PrDetails = parse(&json, "pr details")?;
        debug!(pr_number, title = %details.title, "fetched pr details");
        Ok(details)
    }

    /// Fetch the unified diff of a PR via the diff media type.
    pub fn fetch_pr_diff(&self, owner: &str, repo: &str, pr_number: u64) -> Result<String> {
        self.client
            .get(&format!("/repos/{owner}/{repo}/pulls/{pr_number}"), MEDIA_DIFF)
    }

    pub fn list_changed_files(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<ChangedFile>> {
        let json = self.client.get(
            &format!("/repos/{owner}/{repo}/pulls/{pr_number}/files?per_page=100"),
            MEDIA_JSON,
        )?;
        parse(&json, "changed files")
    }

    /// Post an issue comment on the PR.
    pub fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<CommentRecord> {
        let json = self.client.post(
            &format!("/repos/{owner}/{repo}/issues/{pr_number}/comments"),
            &serde_json::json!({ "body": body }),
        )?;
        let comment: CommentRecord = parse(&json, "comment")?;
        debug!(pr_number, comment_id = comment.id, "posted comment");
        Ok(comment)
    }
}

fn parse<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| Error::RemoteAccess(format!("failed to parse {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Transport that replays canned responses in order, recording requests.
    struct MockTransport {
        responses: RefCell<Vec<Result<String>>>,
        requests: Rc<RefCell<Vec<String>>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: RefCell::new(responses),
                requests: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn next(&self, path: &str) -> Result<String> {
            self.requests.borrow_mut().push(path.to_string());
            let mut responses = self.responses.borrow_mut();
            if responses.is_empty() {
                Err(Error::RemoteAccess("no more mock responses".to_string()))
            } else {
                responses.remove(0)
            }
        }
    }

    impl Transport for MockTransport {
        fn get(&self, path: &str, _accept: &str) -> Result<String> {
            self.next(path)
        }

        fn post(&self, path: &str, _body: &serde_json::Value) -> Result<String> {
            self.next(path)
        }
    }

    fn pr_details_json(number: u64, head: &str) -> String {
        serde_json::json!({
            "id": 1000 + number,
            "number": number,
            "title": format!("PR {number}"),
            "body": "description",
            "state": "open",
            "user": {"login": "octocat"},
            "head": {"ref": head},
            "base": {"ref": "main"},
            "additions": 10,
            "deletions": 2,
            "changed_files": 1,
            "draft": false,
            "html_url": format!("https://github.com/o/r/pull/{number}")
        })
        .to_string()
    }

    #[test]
    fn test_fetch_pr_details() {
        let client = GitHubClient::with_transport(Box::new(MockTransport::new(vec![Ok(
            pr_details_json(42, "feature"),
        )])));
        let details = client.fetch_pr_details("o", "r", 42).unwrap();
        assert_eq!(details.number, 42);
        assert_eq!(details.head.ref_name, "feature");
        assert_eq!(details.user.login, "octocat");
    }

    #[test]
    fn test_fetch_pr_details_builds_path() {
        let transport = MockTransport::new(vec![Ok(pr_details_json(7, "b"))]);
        let requests = transport.requests.clone();
        let client = GitHubClient::with_transport(Box::new(transport));
        client.fetch_pr_details("owner", "repo", 7).unwrap();
        assert_eq!(requests.borrow()[0], "/repos/owner/repo/pulls/7");
    }

    #[test]
    fn test_list_changed_files() {
        let json = serde_json::json!([
            {"filename": "src/calc.py", "status": "modified", "additions": 5, "deletions": 1, "changes": 6, "patch": "@@ -1 +1 @@"},
            {"filename": "README.md", "status": "added", "additions": 3, "deletions": 0, "changes": 3}
        ])
        .to_string();
        let client = GitHubClient::with_transport(Box::new(MockTransport::new(vec![Ok(json)])));
        let files = client.list_changed_files("o", "r", 1).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "src/calc.py");
        assert!(files[1].patch.is_none());
    }

    #[test]
    fn test_post_comment() {
        let json = serde_json::json!({
            "id": 9,
            "body": "hello",
            "user": {"login": "mend-bot"},
            "html_url": "https://github.com/o/r/pull/1#issuecomment-9"
        })
        .to_string();
        let client = GitHubClient::with_transport(Box::new(MockTransport::new(vec![Ok(json)])));
        let comment = client.post_comment("o", "r", 1, "hello").unwrap();
        assert_eq!(comment.id, 9);
        assert_eq!(comment.body, "hello");
    }

    #[test]
    fn test_error_propagated() {
        let client = GitHubClient::with_transport(Box::new(MockTransport::new(vec![Err(
            Error::RemoteAccess("401 unauthorized".to_string()),
        )])));
        let err = client.verify_token().unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_malformed_json_is_remote_access_error() {
        let client = GitHubClient::with_transport(Box::new(MockTransport::new(vec![Ok(
            "not json".to_string(),
        )])));
        let err = client.fetch_pr_details("o", "r", 1).unwrap_err();
        assert!(matches!(err, Error::RemoteAccess(_)));
    }
}
