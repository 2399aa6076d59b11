//! Apply a proposed whole-file fix under test verification.
//!
//! One `apply` call owns the target file for its duration: back up the
//! current content, overwrite, run the verification command, and restore the
//! backup on any non-success path. The backup lives only in memory and only
//! for the duration of the call.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Error;
use crate::process::{ProcessConfig, spawn_and_stream};

pub const DEFAULT_VERIFY_COMMAND: &str = "pytest";
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 60;

/// Verification command configuration. Defaults are applied for any key the
/// caller leaves unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Shell command run as the pass/fail oracle (via `sh -c`).
    pub command: String,
    /// Hard deadline for one verification run.
    pub timeout: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_VERIFY_COMMAND.to_string(),
            timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
        }
    }
}

/// Why an apply call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Target file does not exist; nothing was touched.
    FileNotFound,
    /// Reading the backup or writing the new content failed.
    Io,
    /// The verification command exited nonzero (or could not be run).
    Verification,
    /// The verification command hit the deadline.
    Timeout,
    /// Verification failed AND the backup could not be written back.
    /// The working copy is left in an unknown state; manual repair needed.
    Restore,
}

/// Result of applying one fix.
///
/// Invariant: `succeeded` ⟺ `kind` and `error_detail` are both `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub succeeded: bool,
    pub kind: Option<FailureKind>,
    pub error_detail: Option<String>,
}

impl VerificationOutcome {
    fn pass() -> Self {
        Self {
            succeeded: true,
            kind: None,
            error_detail: None,
        }
    }

    fn fail(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    /// The one outcome that must be escalated: the fix was rejected and the
    /// original content could not be put back.
    pub fn restore_failed(&self) -> bool {
        self.kind == Some(FailureKind::Restore)
    }
}

/// Applies one whole-file replacement and verifies it, leaving the working
/// copy unchanged on any failure. Holds no state across calls.
pub struct FixApplier {
    config: VerifyConfig,
}

impl FixApplier {
    pub fn new(config: VerifyConfig) -> Self {
        Self { config }
    }

    /// Overwrite `file_path` with `new_code`, run the verification command in
    /// the file's directory, and restore the original content unless the
    /// command exits zero.
    ///
    /// `new_code` is the entire replacement file content, never a fragment.
    pub async fn apply(&self, file_path: &Path, new_code: &str) -> VerificationOutcome {
        if !file_path.is_file() {
            return VerificationOutcome::fail(
                FailureKind::FileNotFound,
                format!("file does not exist: {}", file_path.display()),
            );
        }

        let backup = match std::fs::read_to_string(file_path) {
            Ok(content) => content,
            Err(e) => {
                return VerificationOutcome::fail(
                    FailureKind::Io,
                    format!("failed to back up {}: {e}", file_path.display()),
                );
            }
        };
        info!(
            file = %file_path.display(),
            bytes = backup.len(),
            "backed up original content"
        );

        if let Err(e) = std::fs::write(file_path, new_code) {
            // Re-write the backup in case the write half-completed.
            let _ = std::fs::write(file_path, &backup);
            return VerificationOutcome::fail(
                FailureKind::Io,
                format!("failed to write new code to {}: {e}", file_path.display()),
            );
        }
        info!(
            file = %file_path.display(),
            bytes = new_code.len(),
            "wrote replacement content"
        );

        // Every failure from here on goes through the single restore site
        // below, keyed off the failure value.
        let failure = self.verify(file_path).await;

        match failure {
            None => {
                info!(file = %file_path.display(), "verification passed, keeping new content");
                VerificationOutcome::pass()
            }
            Some((kind, detail)) => {
                if let Err(e) = std::fs::write(file_path, &backup) {
                    warn!(
                        file = %file_path.display(),
                        error = %e,
                        "failed to restore original content after rejected fix"
                    );
                    return VerificationOutcome::fail(
                        FailureKind::Restore,
                        format!(
                            "verification failed ({detail}) and restoring {} also failed: {e}",
                            file_path.display()
                        ),
                    );
                }
                info!(file = %file_path.display(), "restored original content");
                VerificationOutcome::fail(kind, detail)
            }
        }
    }

    /// Run the verification command. `None` on exit code zero, otherwise the
    /// failure kind plus detail (captured stderr, timeout marker, or spawn
    /// error description).
    async fn verify(&self, file_path: &Path) -> Option<(FailureKind, String)> {
        let working_dir = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        info!(command = %self.config.command, cwd = %working_dir.display(), "running verification");

        let config = ProcessConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), self.config.command.clone()],
            working_dir,
            timeout: Some(self.config.timeout),
            log_prefix: "verify".to_string(),
        };

        match spawn_and_stream(config).await {
            Ok(output) if output.success() => None,
            Ok(output) => {
                let stderr = output.stderr();
                let detail = if stderr.trim().is_empty() {
                    format!("verification command exited with code {}", output.exit_code)
                } else {
                    stderr
                };
                Some((FailureKind::Verification, detail))
            }
            Err(Error::ProcessTimeout(dur)) => Some((
                FailureKind::Timeout,
                format!("verification timed out after {}s", dur.as_secs()),
            )),
            Err(e) => Some((FailureKind::Verification, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_invariant_pass() {
        let outcome = VerificationOutcome::pass();
        assert!(outcome.succeeded);
        assert!(outcome.kind.is_none());
        assert!(outcome.error_detail.is_none());
        assert!(!outcome.restore_failed());
    }

    #[test]
    fn test_outcome_invariant_fail() {
        let outcome = VerificationOutcome::fail(FailureKind::Verification, "boom");
        assert!(!outcome.succeeded);
        assert_eq!(outcome.kind, Some(FailureKind::Verification));
        assert_eq!(outcome.error_detail.as_deref(), Some("boom"));
    }

    #[test]
    fn test_restore_failure_is_distinct() {
        let outcome = VerificationOutcome::fail(FailureKind::Restore, "secondary");
        assert!(outcome.restore_failed());
        let plain = VerificationOutcome::fail(FailureKind::Timeout, "timed out");
        assert!(!plain.restore_failed());
    }

    #[test]
    fn test_default_config() {
        let config = VerifyConfig::default();
        assert_eq!(config.command, "pytest");
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_apply_nonexistent_file() {
        let applier = FixApplier::new(VerifyConfig::default());
        let outcome = applier
            .apply(Path::new("/no/such/file.py"), "anything")
            .await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.kind, Some(FailureKind::FileNotFound));
        assert!(outcome.error_detail.unwrap().contains("does not exist"));
    }
}
