use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Run a git command in `dir`, returning trimmed stdout. Nonzero exit maps
/// to `Error::Git` carrying stderr.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    debug!(?args, dir = %dir.display(), "running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )))
    }
}

/// Fetch from origin and check out `branch` in the working copy.
pub fn checkout(dir: &Path, branch: &str) -> Result<()> {
    run_git(dir, &["fetch", "origin", branch])?;
    run_git(dir, &["checkout", branch])?;
    info!(branch, "checked out branch");
    Ok(())
}

/// Stage everything and commit. Returns false when there was nothing to
/// commit.
pub fn commit_all(dir: &Path, message: &str) -> Result<bool> {
    run_git(dir, &["add", "-A"])?;
    let status = run_git(dir, &["status", "--porcelain"])?;
    if status.is_empty() {
        debug!("nothing to commit");
        return Ok(false);
    }
    run_git(dir, &["commit", "-m", message])?;
    info!(message, "committed changes");
    Ok(true)
}

/// Push `branch` to origin.
pub fn push(dir: &Path, branch: &str) -> Result<()> {
    run_git(dir, &["push", "origin", branch])?;
    info!(branch, "pushed branch");
    Ok(())
}

/// Clone `owner/repo` into `destination`.
pub fn clone_repo(owner: &str, repo: &str, destination: &Path) -> Result<()> {
    let url = format!("https://github.com/{owner}/{repo}.git");
    let dest = destination.to_string_lossy();
    run_git(Path::new("."), &["clone", &url, &dest])?;
    info!(%url, dest = %destination.display(), "cloned repository");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-q"]).unwrap();
        run_git(dir.path(), &["config", "user.email", "test@example.com"]).unwrap();
        run_git(dir.path(), &["config", "user.name", "test"]).unwrap();
        dir
    }

    #[test]
    fn test_run_git_failure_carries_stderr() {
        let dir = init_repo();
        let err = run_git(dir.path(), &["checkout", "no-such-branch-xyz"]).unwrap_err();
        assert!(err.to_string().contains("git checkout no-such-branch-xyz failed"));
    }

    #[test]
    fn test_commit_all_nothing_to_commit() {
        let dir = init_repo();
        assert!(!commit_all(dir.path(), "empty").unwrap());
    }

    #[test]
    fn test_commit_all_with_changes() {
        let dir = init_repo();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        assert!(commit_all(dir.path(), "add a.txt").unwrap());
        let log = run_git(dir.path(), &["log", "--oneline"]).unwrap();
        assert!(log.contains("add a.txt"));
        // A second call with no new changes is a no-op.
        assert!(!commit_all(dir.path(), "noop").unwrap());
    }
}
