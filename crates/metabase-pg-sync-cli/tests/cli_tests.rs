//! CLI integration tests for metabase-pg-sync.
//!
//! These verify flag handling, help output, and exit codes for error
//! conditions that need no live upstream or target.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the metabase-pg-sync binary with a clean environment.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("metabase-pg-sync").unwrap();
    cmd.env_clear();
    cmd
}

#[test]
fn test_help_exits_zero_and_lists_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--ignore-errors"));
}

#[test]
fn test_short_help_flag() {
    cmd()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_unknown_flag_prints_usage_and_exits_zero() {
    cmd()
        .arg("--bogus")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_missing_configuration_exits_one() {
    cmd()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_missing_configuration_names_the_variable() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("UPSTREAM_DATABASE_ID is required"));
}

#[test]
fn test_dry_run_still_requires_configuration() {
    cmd().arg("--dry-run").assert().failure().code(1);
}

#[test]
fn test_invalid_port_is_config_error() {
    cmd()
        .env("UPSTREAM_BASE_URL", "https://example.com")
        .env("UPSTREAM_DATABASE_ID", "2")
        .env("UPSTREAM_USERNAME", "u")
        .env("UPSTREAM_PASSWORD", "p")
        .env("TARGET_HOST", "localhost")
        .env("TARGET_PORT", "0")
        .env("TARGET_NAME", "db")
        .env("TARGET_USERNAME", "u")
        .env("TARGET_PASSWORD", "p")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("TARGET_PORT"));
}
