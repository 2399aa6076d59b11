//! Graph-backed persistence of PR / analysis / fix / decision records.
//!
//! A write-behind sink: the orchestrator logs store failures and moves on,
//! no run result ever depends on a store write landing.

use std::thread;
use std::time::Duration;

use base64::Engine as _;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::github::PrDetails;
use crate::schema::{FixRecord, ReviewReport};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Abstraction over Cypher statement execution for testability.
pub trait CypherClient {
    /// Run one parameterized statement, returning the `results` payload.
    fn run(&self, statement: &str, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// Real client against the Neo4j HTTP transaction endpoint.
struct HttpCypherClient {
    endpoint: String,
    auth_header: String,
}

impl HttpCypherClient {
    fn new(uri: &str, user: &str, password: &str) -> Self {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        Self {
            endpoint: format!("{}/db/neo4j/tx/commit", uri.trim_end_matches('/')),
            auth_header: format!("Basic {credentials}"),
        }
    }
}

/// Only retry rate-limits (429), server errors (5xx), and transport errors.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

impl CypherClient for HttpCypherClient {
    fn run(&self, statement: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let body = json!({
            "statements": [{ "statement": statement, "parameters": params }]
        });

        let mut backoff_ms = INITIAL_BACKOFF_MS;
        for attempt in 1..=MAX_RETRIES {
            match ureq::post(&self.endpoint)
                .set("Authorization", &self.auth_header)
                .set("Content-Type", "application/json")
                .send_json(&body)
            {
                Ok(response) => {
                    let reply: serde_json::Value = response.into_json().map_err(|e| {
                        Error::Store(format!("failed to parse store response: {e}"))
                    })?;

                    if let Some(errors) = reply.get("errors").and_then(|e| e.as_array())
                        && !errors.is_empty()
                    {
                        return Err(Error::Store(format!(
                            "cypher errors: {}",
                            serde_json::Value::Array(errors.clone())
                        )));
                    }

                    return Ok(reply.get("results").cloned().unwrap_or(json!([])));
                }
                Err(ref e) if attempt < MAX_RETRIES && is_retryable(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms,
                        "retrying store request after transient error"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms *= 2;
                }
                Err(e) => return Err(Error::Store(format!("store request failed: {e}"))),
            }
        }
        unreachable!()
    }
}

/// Persists bot records into the graph, keyed by `owner/repo` + PR number.
pub struct RecordStore {
    client: Box<dyn CypherClient>,
}

fn record_id(owner: &str, repo: &str, pr_number: u64, kind: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{owner}/{repo}/pr-{pr_number}/{kind}-{}", &suffix[..8])
}

impl RecordStore {
    pub fn new(uri: &str, user: &str, password: &str) -> Self {
        Self {
            client: Box::new(HttpCypherClient::new(uri, user, password)),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_client(client: Box<dyn CypherClient>) -> Self {
        Self { client }
    }

    pub fn store_pr(&self, owner: &str, repo: &str, pr: &PrDetails) -> Result<()> {
        self.client.run(
            "MERGE (p:PullRequest {owner: $owner, repo: $repo, number: $number}) \
             SET p.title = $title, p.author = $author, p.url = $url, \
                 p.updated_at = timestamp()",
            json!({
                "owner": owner,
                "repo": repo,
                "number": pr.number,
                "title": pr.title,
                "author": pr.user.login,
                "url": pr.html_url,
            }),
        )?;
        debug!(pr_number = pr.number, "stored pull request");
        Ok(())
    }

    pub fn store_analysis(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        report: &ReviewReport,
    ) -> Result<String> {
        let id = record_id(owner, repo, pr_number, "analysis");
        self.client.run(
            "MERGE (p:PullRequest {owner: $owner, repo: $repo, number: $number}) \
             CREATE (a:Analysis {id: $id, summary: $summary, issues_found: $issues_found, \
                     recommendation: $recommendation, score: $score, created_at: timestamp()}) \
             MERGE (p)-[:HAS_ANALYSIS]->(a)",
            json!({
                "owner": owner,
                "repo": repo,
                "number": pr_number,
                "id": id,
                "summary": report.summary,
                "issues_found": report.total_issues() as u64,
                "recommendation": report.overall_recommendation.label(),
                "score": report.overall_score,
            }),
        )?;
        debug!(%id, "stored analysis");
        Ok(id)
    }

    /// Store one record per fix with whether it survived verification.
    pub fn store_fixes(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        fixes: &[(FixRecord, bool)],
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(fixes.len());
        for (fix, applied) in fixes {
            let id = record_id(owner, repo, pr_number, "fix");
            self.client.run(
                "MERGE (p:PullRequest {owner: $owner, repo: $repo, number: $number}) \
                 CREATE (f:Fix {id: $id, file_path: $file_path, issue: $issue, \
                         applied: $applied, created_at: timestamp()}) \
                 MERGE (p)-[:HAS_FIX]->(f)",
                json!({
                    "owner": owner,
                    "repo": repo,
                    "number": pr_number,
                    "id": id,
                    "file_path": fix.file_path,
                    "issue": fix.issue,
                    "applied": applied,
                }),
            )?;
            ids.push(id);
        }
        debug!(count = ids.len(), "stored fixes");
        Ok(ids)
    }

    pub fn store_decision(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        decision_type: &str,
        reasoning: &str,
        outcome: Option<serde_json::Value>,
    ) -> Result<String> {
        let id = record_id(owner, repo, pr_number, "decision");
        self.client.run(
            "MERGE (p:PullRequest {owner: $owner, repo: $repo, number: $number}) \
             CREATE (d:Decision {id: $id, type: $type, reasoning: $reasoning, \
                     outcome: $outcome, created_at: timestamp()}) \
             MERGE (p)-[:HAS_DECISION]->(d)",
            json!({
                "owner": owner,
                "repo": repo,
                "number": pr_number,
                "id": id,
                "type": decision_type,
                "reasoning": reasoning,
                "outcome": outcome.map(|o| o.to_string()),
            }),
        )?;
        debug!(%id, decision_type, "stored decision");
        Ok(id)
    }

    /// Everything recorded for one PR: analyses, fixes, decisions.
    pub fn pr_history(&self, owner: &str, repo: &str, pr_number: u64) -> Result<serde_json::Value> {
        self.client.run(
            "MATCH (p:PullRequest {owner: $owner, repo: $repo, number: $number}) \
             OPTIONAL MATCH (p)-[:HAS_ANALYSIS]->(a:Analysis) \
             OPTIONAL MATCH (p)-[:HAS_FIX]->(f:Fix) \
             OPTIONAL MATCH (p)-[:HAS_DECISION]->(d:Decision) \
             RETURN p, collect(DISTINCT a) AS analyses, \
                    collect(DISTINCT f) AS fixes, \
                    collect(DISTINCT d) AS decisions",
            json!({ "owner": owner, "repo": repo, "number": pr_number }),
        )
    }

    /// Per-repository record counts.
    pub fn statistics(&self, owner: &str, repo: &str) -> Result<serde_json::Value> {
        self.client.run(
            "MATCH (p:PullRequest {owner: $owner, repo: $repo}) \
             OPTIONAL MATCH (p)-[:HAS_ANALYSIS]->(a:Analysis) \
             OPTIONAL MATCH (p)-[:HAS_FIX]->(f:Fix) \
             OPTIONAL MATCH (p)-[:HAS_DECISION]->(d:Decision) \
             RETURN count(DISTINCT p) AS total_prs, \
                    count(DISTINCT a) AS total_analyses, \
                    count(DISTINCT f) AS total_fixes, \
                    count(DISTINCT d) AS total_decisions",
            json!({ "owner": owner, "repo": repo }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{GhRef, GhUser};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct MockCypherClient {
        statements: Rc<RefCell<Vec<(String, serde_json::Value)>>>,
        fail: bool,
    }

    impl MockCypherClient {
        fn new() -> Self {
            Self {
                statements: Rc::new(RefCell::new(Vec::new())),
                fail: false,
            }
        }
    }

    impl CypherClient for MockCypherClient {
        fn run(&self, statement: &str, params: serde_json::Value) -> Result<serde_json::Value> {
            if self.fail {
                return Err(Error::Store("connection refused".to_string()));
            }
            self.statements
                .borrow_mut()
                .push((statement.to_string(), params));
            Ok(json!([]))
        }
    }

    fn pr_details() -> PrDetails {
        PrDetails {
            id: 1,
            number: 42,
            title: "Fix adder".to_string(),
            body: None,
            state: "open".to_string(),
            user: GhUser {
                login: "octocat".to_string(),
            },
            head: GhRef {
                ref_name: "fix".to_string(),
            },
            base: GhRef {
                ref_name: "main".to_string(),
            },
            additions: 1,
            deletions: 1,
            changed_files: 1,
            draft: false,
            html_url: "https://github.com/o/r/pull/42".to_string(),
        }
    }

    #[test]
    fn test_store_pr_merges_node() {
        let client = MockCypherClient::new();
        let statements = Rc::clone(&client.statements);
        let store = RecordStore::with_client(Box::new(client));

        store.store_pr("o", "r", &pr_details()).unwrap();

        let recorded = statements.borrow();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].0.contains("MERGE (p:PullRequest"));
        assert_eq!(recorded[0].1["number"], 42);
        assert_eq!(recorded[0].1["author"], "octocat");
    }

    #[test]
    fn test_store_analysis_returns_scoped_id() {
        let client = MockCypherClient::new();
        let store = RecordStore::with_client(Box::new(client));
        let report = ReviewReport::empty("clean");

        let id = store.store_analysis("o", "r", 42, &report).unwrap();
        assert!(id.starts_with("o/r/pr-42/analysis-"));
        // 8-char random suffix
        assert_eq!(id.rsplit('-').next().unwrap().len(), 8);
    }

    #[test]
    fn test_store_fixes_one_statement_per_fix() {
        let client = MockCypherClient::new();
        let statements = Rc::clone(&client.statements);
        let store = RecordStore::with_client(Box::new(client));

        let fix = FixRecord {
            file_path: "calc.py".to_string(),
            new_code: "pass".to_string(),
            issue: "bug".to_string(),
        };
        let ids = store
            .store_fixes("o", "r", 42, &[(fix.clone(), true), (fix, false)])
            .unwrap();

        assert_eq!(ids.len(), 2);
        let recorded = statements.borrow();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].1["applied"], true);
        assert_eq!(recorded[1].1["applied"], false);
    }

    #[test]
    fn test_store_decision_carries_outcome() {
        let client = MockCypherClient::new();
        let statements = Rc::clone(&client.statements);
        let store = RecordStore::with_client(Box::new(client));

        store
            .store_decision("o", "r", 42, "apply_fix", "verified", Some(json!({"status": "ok"})))
            .unwrap();

        let recorded = statements.borrow();
        assert_eq!(recorded[0].1["type"], "apply_fix");
        assert!(
            recorded[0].1["outcome"]
                .as_str()
                .unwrap()
                .contains("\"status\"")
        );
    }

    #[test]
    fn test_pr_history_queries_all_record_kinds() {
        let client = MockCypherClient::new();
        let statements = Rc::clone(&client.statements);
        let store = RecordStore::with_client(Box::new(client));

        store.pr_history("o", "r", 42).unwrap();

        let recorded = statements.borrow();
        let statement = &recorded[0].0;
        assert!(statement.contains("HAS_ANALYSIS"));
        assert!(statement.contains("HAS_FIX"));
        assert!(statement.contains("HAS_DECISION"));
        assert_eq!(recorded[0].1["number"], 42);
    }

    #[test]
    fn test_statistics_scoped_to_repo() {
        let client = MockCypherClient::new();
        let statements = Rc::clone(&client.statements);
        let store = RecordStore::with_client(Box::new(client));

        store.statistics("o", "r").unwrap();

        let recorded = statements.borrow();
        assert!(recorded[0].0.contains("count(DISTINCT p) AS total_prs"));
        assert_eq!(recorded[0].1["owner"], "o");
        assert_eq!(recorded[0].1["repo"], "r");
    }

    #[test]
    fn test_store_errors_propagate_to_caller() {
        let client = MockCypherClient {
            statements: Rc::new(RefCell::new(Vec::new())),
            fail: true,
        };
        let store = RecordStore::with_client(Box::new(client));
        let err = store.store_pr("o", "r", &pr_details()).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
