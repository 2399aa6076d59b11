use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::agents::review::ReviewAgent;
use crate::agents::testgen::TestAgent;
use crate::agents::writer::WriterAgent;
use crate::apply::{FixApplier, VerificationOutcome};
use crate::cli::{CliCommand, TargetArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::git;
use crate::github::GitHubClient;
use crate::process::{ProcessConfig, spawn_and_stream};
use crate::schema::FixRecord;
use crate::store::RecordStore;

const FIX_COMMIT_MESSAGE: &str = "Apply verified fixes";

/// How much captured test output makes it into a PR comment.
const MAX_COMMENT_OUTPUT_CHARS: usize = 2000;

/// Result of one command execution, serialized into the run summary.
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub command: String,
    pub output: Map<String, Value>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub finished_at: u64,
}

/// What a handler produced before timing/bookkeeping is added.
struct CommandOutput {
    success: bool,
    error: Option<String>,
    output: Map<String, Value>,
}

impl CommandOutput {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
            output: Map::new(),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            output: Map::new(),
        }
    }

    fn set(&mut self, key: &str, value: Value) {
        self.output.insert(key.to_string(), value);
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Routes commands to handlers and aggregates their outcomes. All handlers
/// are sequential: one verification child process at a time, fix records
/// applied in the order they were produced.
pub struct Orchestrator {
    github: GitHubClient,
    writer: WriterAgent,
    reviewer: ReviewAgent,
    testgen: TestAgent,
    applier: FixApplier,
    store: Option<RecordStore>,
    config: Config,
}

impl Orchestrator {
    pub fn new(
        github: GitHubClient,
        writer: WriterAgent,
        reviewer: ReviewAgent,
        testgen: TestAgent,
        applier: FixApplier,
        store: Option<RecordStore>,
        config: Config,
    ) -> Self {
        Self {
            github,
            writer,
            reviewer,
            testgen,
            applier,
            store,
            config,
        }
    }

    /// Execute one command. Collaborator failures become a failed result,
    /// never a crash.
    pub async fn execute(&self, command: &CliCommand) -> ExecutionResult {
        let started = Instant::now();
        let target = command.target();
        info!(
            command = command.name(),
            owner = %target.owner,
            repo = %target.repo,
            pr_number = target.pr_number,
            dry_run = self.config.dry_run,
            "starting command"
        );

        if let Err(e) = self.authenticate(&target.owner, &target.repo) {
            warn!(error = %e, "authentication failed");
            return ExecutionResult {
                success: false,
                command: command.name().to_string(),
                output: Map::new(),
                error: Some(format!("authentication failed: {e}")),
                duration_seconds: started.elapsed().as_secs_f64(),
                finished_at: now_secs(),
            };
        }

        let outcome = match command {
            CliCommand::Fix { target } => self.run_fix(target).await,
            CliCommand::Review { target } => self.run_review(target),
            CliCommand::Test { target } => self.run_test(target).await,
            CliCommand::Analyze { target } => self.run_analyze(target),
            CliCommand::Testgen { target } => self.run_testgen(target),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                warn!(command = command.name(), error = %e, "command failed");
                CommandOutput::failed(e.to_string())
            }
        };

        ExecutionResult {
            success: output.success,
            command: command.name().to_string(),
            output: output.output,
            error: output.error,
            duration_seconds: started.elapsed().as_secs_f64(),
            finished_at: now_secs(),
        }
    }

    /// The token must be valid and the repository reachable before any
    /// handler runs.
    fn authenticate(&self, owner: &str, repo: &str) -> Result<()> {
        let login = self.github.verify_token()?;
        let info = self.github.get_repo_info(owner, repo)?;
        info!(%login, repo = %info.full_name, "authenticated");
        Ok(())
    }

    // --- fix ---

    async fn run_fix(&self, target: &TargetArgs) -> Result<CommandOutput> {
        let TargetArgs {
            owner,
            repo,
            pr_number,
            repo_path,
        } = target;
        let pr_number = *pr_number;
        let repo_path = Path::new(repo_path);
        let mut out = CommandOutput::ok();

        // 1. The PR must exist before anything else runs.
        let pr = match self.github.fetch_pr_details(owner, repo, pr_number) {
            Ok(pr) => pr,
            Err(e) => {
                warn!(pr_number, error = %e, "pr not accessible");
                let comment =
                    format!("❌ PR #{pr_number} does not exist or is not accessible.");
                self.try_post_comment(owner, repo, pr_number, &comment);
                out.set("pr_valid", json!(false));
                out.success = false;
                out.error = Some("invalid or inaccessible PR".to_string());
                return Ok(out);
            }
        };
        out.set("pr_valid", json!(true));
        out.set("pr_url", json!(pr.html_url));

        if let Some(ref store) = self.store
            && let Err(e) = store.store_pr(owner, repo, &pr)
        {
            warn!(error = %e, "failed to store pull request record");
        }

        // 2. Fetch the diff; an empty PR has nothing to fix.
        let diff = self.github.fetch_pr_diff(owner, repo, pr_number)?;
        out.set("diff_size", json!(diff.len()));
        if diff.trim().is_empty() {
            let comment = "📝 No changes detected in this PR. Nothing to fix.";
            self.try_post_comment(owner, repo, pr_number, comment);
            out.success = false;
            out.error = Some("empty PR diff".to_string());
            return Ok(out);
        }

        let changed = self.github.list_changed_files(owner, repo, pr_number)?;
        out.set("changed_files", json!(changed.len()));

        // 3. Generate fix proposals.
        let fixes = self.writer.generate_fixes(&diff, repo_path)?;
        out.set("fixes_found", json!(fixes.len()));
        if fixes.is_empty() {
            let comment = "✅ Code analysis complete. No issues found that require fixing.";
            self.try_post_comment(owner, repo, pr_number, comment);
            return Ok(out);
        }

        // 4. Apply and verify, one record at a time, in order.
        let mut applied: Vec<FixRecord> = Vec::new();
        let mut rejected: Vec<(FixRecord, VerificationOutcome)> = Vec::new();
        for fix in fixes {
            let path = resolve_fix_path(repo_path, &fix.file_path);
            info!(file = %path.display(), issue = %fix.issue, "applying fix");
            let outcome = self.applier.apply(&path, &fix.new_code).await;
            if outcome.succeeded {
                info!(file = %path.display(), "fix verified");
                applied.push(fix);
            } else {
                warn!(
                    file = %path.display(),
                    detail = outcome.error_detail.as_deref().unwrap_or(""),
                    "fix rejected"
                );
                rejected.push((fix, outcome));
            }
        }
        out.set("fixes_applied", json!(applied.len()));
        out.set("fixes_rejected", json!(rejected.len()));

        // 5. Push the survivors to the PR head branch.
        if !applied.is_empty() {
            if self.config.dry_run {
                info!("dry run, skipping push");
                out.set("dry_run", json!(true));
            } else {
                match self.push_fixes(repo_path, &pr.head.ref_name) {
                    Ok(pushed) => {
                        out.set("fixes_pushed", json!(pushed));
                        let files: Vec<&str> =
                            applied.iter().map(|f| f.file_path.as_str()).collect();
                        let comment = format!(
                            "✅ **Verified fixes applied**\n\nApplied {} fix(es) to {}\n\nAll tests passed!",
                            applied.len(),
                            files.join(", ")
                        );
                        self.try_post_comment(owner, repo, pr_number, &comment);
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to push fixes");
                        out.set("push_error", json!(e.to_string()));
                    }
                }
            }
        }

        // 6. Report the rejects.
        if !rejected.is_empty() {
            let comment = render_fix_failure_comment(&rejected);
            self.try_post_comment(owner, repo, pr_number, &comment);
        }

        if let Some(ref store) = self.store {
            let records: Vec<(FixRecord, bool)> = applied
                .iter()
                .map(|f| (f.clone(), true))
                .chain(rejected.iter().map(|(f, _)| (f.clone(), false)))
                .collect();
            if let Err(e) = store.store_fixes(owner, repo, pr_number, &records) {
                warn!(error = %e, "failed to store fix records");
            }
            if let Err(e) = store.store_decision(
                owner,
                repo,
                pr_number,
                "apply_fix",
                "verified fixes applied, rejects rolled back",
                Some(json!({ "applied": applied.len(), "rejected": rejected.len() })),
            ) {
                warn!(error = %e, "failed to store decision record");
            }
        }

        if applied.is_empty() {
            out.success = false;
            out.error = Some("all fixes failed verification".to_string());
        }
        Ok(out)
    }

    fn push_fixes(&self, repo_path: &Path, branch: &str) -> Result<bool> {
        git::checkout(repo_path, branch)?;
        if !git::commit_all(repo_path, FIX_COMMIT_MESSAGE)? {
            return Ok(false);
        }
        git::push(repo_path, branch)?;
        Ok(true)
    }

    // --- review ---

    fn run_review(&self, target: &TargetArgs) -> Result<CommandOutput> {
        let TargetArgs {
            owner,
            repo,
            pr_number,
            ..
        } = target;
        let pr_number = *pr_number;
        let mut out = CommandOutput::ok();

        let pr = self.github.fetch_pr_details(owner, repo, pr_number)?;
        out.set("pr_url", json!(pr.html_url));

        if let Some(ref store) = self.store
            && let Err(e) = store.store_pr(owner, repo, &pr)
        {
            warn!(error = %e, "failed to store pull request record");
        }

        let diff = self.github.fetch_pr_diff(owner, repo, pr_number)?;
        let changed = self.github.list_changed_files(owner, repo, pr_number)?;
        out.set("changed_files", json!(changed.len()));

        let report = self.reviewer.analyze(&diff, &changed)?;
        out.set("issues_found", json!(report.total_issues()));
        out.set(
            "recommendation",
            json!(report.overall_recommendation.label()),
        );

        if self.config.dry_run {
            info!("dry run, skipping review comment");
            out.set("dry_run", json!(true));
        } else {
            let comment = ReviewAgent::render_comment(&report);
            let posted = self.github.post_comment(owner, repo, pr_number, &comment)?;
            out.set("comment_url", json!(posted.html_url));
        }

        if let Some(ref store) = self.store
            && let Err(e) = store.store_analysis(owner, repo, pr_number, &report)
        {
            warn!(error = %e, "failed to store analysis record");
        }

        Ok(out)
    }

    // --- test ---

    async fn run_test(&self, target: &TargetArgs) -> Result<CommandOutput> {
        let TargetArgs {
            owner,
            repo,
            pr_number,
            repo_path,
        } = target;
        let pr_number = *pr_number;
        let repo_path = PathBuf::from(repo_path);
        let mut out = CommandOutput::ok();

        let pr = self.github.fetch_pr_details(owner, repo, pr_number)?;
        out.set("pr_url", json!(pr.html_url));

        if !repo_path.exists() {
            info!(path = %repo_path.display(), "working copy missing, cloning");
            git::clone_repo(owner, repo, &repo_path)?;
        }

        let config = ProcessConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), self.config.verify_command.clone()],
            working_dir: repo_path,
            timeout: Some(Duration::from_secs(self.config.verify_timeout)),
            log_prefix: "test".to_string(),
        };

        let (passed, stdout, stderr) = match spawn_and_stream(config).await {
            Ok(output) => {
                out.set("exit_code", json!(output.exit_code));
                (output.success(), output.stdout(), output.stderr())
            }
            Err(Error::ProcessTimeout(dur)) => {
                let marker = format!("tests timed out after {}s", dur.as_secs());
                out.set("error", json!(marker.clone()));
                (false, String::new(), marker)
            }
            Err(e) => return Err(e),
        };
        out.set("passed", json!(passed));

        if self.config.dry_run {
            info!("dry run, skipping test results comment");
            out.set("dry_run", json!(true));
        } else {
            let comment = render_test_comment(passed, &stdout, &stderr);
            self.try_post_comment(owner, repo, pr_number, &comment);
        }

        out.success = passed;
        if !passed {
            out.error = Some("tests failed".to_string());
        }
        Ok(out)
    }

    // --- analyze ---

    fn run_analyze(&self, target: &TargetArgs) -> Result<CommandOutput> {
        let TargetArgs {
            owner,
            repo,
            pr_number,
            ..
        } = target;
        let pr_number = *pr_number;
        let mut out = CommandOutput::ok();

        let diff = self.github.fetch_pr_diff(owner, repo, pr_number)?;
        let changed = self.github.list_changed_files(owner, repo, pr_number)?;
        out.set("changed_files", json!(changed.len()));

        let report = self.reviewer.analyze(&diff, &changed)?;
        out.set(
            "analysis",
            serde_json::to_value(&report)
                .map_err(|e| Error::Orchestrator(format!("failed to serialize analysis: {e}")))?,
        );

        if let Some(ref store) = self.store
            && let Err(e) = store.store_analysis(owner, repo, pr_number, &report)
        {
            warn!(error = %e, "failed to store analysis record");
        }

        Ok(out)
    }

    // --- testgen ---

    fn run_testgen(&self, target: &TargetArgs) -> Result<CommandOutput> {
        let TargetArgs {
            owner,
            repo,
            pr_number,
            repo_path,
        } = target;
        let pr_number = *pr_number;
        let repo_path = Path::new(repo_path);
        let mut out = CommandOutput::ok();

        let diff = self.github.fetch_pr_diff(owner, repo, pr_number)?;
        let changed = self.github.list_changed_files(owner, repo, pr_number)?;

        let cases = self.testgen.generate(&diff, &changed)?;
        out.set("test_cases", json!(cases.len()));

        if self.config.dry_run {
            info!("dry run, not writing test files");
            out.set("dry_run", json!(true));
        } else {
            let mut written = Vec::new();
            for case in &cases {
                match self.testgen.write_test_file(repo_path, case) {
                    Ok(path) => written.push(path.display().to_string()),
                    Err(e) => warn!(file = %case.file, error = %e, "failed to write test file"),
                }
            }
            out.set("files_written", json!(written));

            let report = TestAgent::render_report(&cases);
            self.try_post_comment(owner, repo, pr_number, &report);
        }

        Ok(out)
    }

    /// Post a comment, logging instead of failing: a lost comment must not
    /// abort a run that already did its work.
    fn try_post_comment(&self, owner: &str, repo: &str, pr_number: u64, body: &str) {
        if let Err(e) = self.github.post_comment(owner, repo, pr_number, body) {
            warn!(pr_number, error = %e, "failed to post comment");
        }
    }
}

/// A fix's `file_path` is resolved against the working copy unless absolute.
fn resolve_fix_path(repo_path: &Path, file_path: &str) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo_path.join(path)
    }
}

fn render_fix_failure_comment(rejected: &[(FixRecord, VerificationOutcome)]) -> String {
    let mut comment = String::from("### 🚨 Fix Verification Failed\n\n");
    comment.push_str("The following fixes failed test verification:\n\n");

    for (fix, outcome) in rejected {
        comment.push_str(&format!("**File:** `{}`\n\n", fix.file_path));
        comment.push_str("**Test Output:**\n```\n");
        comment.push_str(outcome.error_detail.as_deref().unwrap_or("Unknown error"));
        comment.push_str("\n```\n\n");
        if outcome.restore_failed() {
            comment.push_str(
                "⚠️ **The original content could not be restored for this file — \
                 manual intervention required.**\n\n",
            );
        }
    }

    comment.push_str(
        "Failed fixes were **not applied** and files were restored to their original state.",
    );
    comment
}

fn render_test_comment(passed: bool, stdout: &str, stderr: &str) -> String {
    let status = if passed { "✅ PASSED" } else { "❌ FAILED" };
    let mut comment = format!("## {status} Test Results\n\n");
    comment.push_str(&format!(
        "```\n{}\n```",
        tail(stdout, MAX_COMMENT_OUTPUT_CHARS)
    ));
    if !stderr.trim().is_empty() {
        comment.push_str(&format!(
            "\n**Errors:**\n```\n{}\n```",
            tail(stderr, MAX_COMMENT_OUTPUT_CHARS)
        ));
    }
    comment
}

/// Last `max` characters of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut idx = s.len() - max;
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    &s[idx..]
}

/// Write the machine-readable run summary.
pub fn write_output(path: &Path, results: &[ExecutionResult]) -> Result<()> {
    let final_status = if results.iter().all(|r| r.success) {
        "success"
    } else {
        "failure"
    };
    let summary = json!({
        "finished_at": now_secs(),
        "results": results,
        "final_status": final_status,
    });
    std::fs::write(path, serde_json::to_string_pretty(&summary).map_err(|e| {
        Error::Orchestrator(format!("failed to serialize run summary: {e}"))
    })?)?;
    info!(path = %path.display(), final_status, "wrote run summary");
    Ok(())
}
