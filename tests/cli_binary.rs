use assert_cmd::Command;
use predicates::prelude::*;

fn mend() -> Command {
    Command::cargo_bin("mend").unwrap()
}

#[test]
fn test_no_args_shows_usage() {
    mend()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_help_lists_subcommands() {
    mend().arg("--help").assert().success().stdout(
        predicate::str::contains("fix")
            .and(predicate::str::contains("review"))
            .and(predicate::str::contains("test"))
            .and(predicate::str::contains("analyze"))
            .and(predicate::str::contains("testgen")),
    );
}

#[test]
fn test_fix_missing_required_args() {
    mend()
        .arg("fix")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--owner"));
}

#[test]
fn test_unknown_subcommand_rejected() {
    mend()
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_missing_credentials_fail_cleanly() {
    mend()
        .args([
            "review",
            "--owner",
            "octocat",
            "--repo",
            "hello",
            "--pr-number",
            "1",
            "--repo-path",
            ".",
        ])
        .env_remove("GITHUB_TOKEN")
        .env_remove("GEMINI_API_KEY")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "missing required environment variables",
        ));
}

#[test]
fn test_explicit_config_path_must_exist() {
    mend()
        .args([
            "review",
            "--config",
            "/no/such/mend.toml",
            "--owner",
            "o",
            "--repo",
            "r",
            "--pr-number",
            "1",
            "--repo-path",
            ".",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}
