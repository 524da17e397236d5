//! CLI integration tests
//!
//! Tests the sentinel-deploy CLI using assert_cmd. Nothing here reaches a
//! real node: configs point at addresses that are never contacted.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn sentinel_deploy() -> Command {
    Command::cargo_bin("sentinel-deploy")
        .expect("Failed to locate sentinel-deploy binary - ensure it's built before running tests")
}

/// Write a minimal valid config into `dir`, returning its path
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("sentinel-deploy.toml");
    let state = dir.join("state");
    std::fs::write(
        &path,
        format!(
            r#"
repo_path = "{repo}"
state_dir = "{state}"

[nodes.sentinel]
name = "node2"
address = "192.0.2.2"
live_root = "/srv/app"
service_url = "http://192.0.2.2:8000"

[nodes.production]
name = "node1"
address = "192.0.2.1"
live_root = "/srv/app"
service_url = "http://192.0.2.1:8000"
"#,
            repo = dir.display(),
            state = state.display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    sentinel_deploy()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sentinel-deploy"))
        .stdout(predicate::str::contains("Gated two-node deployment"));
}

#[test]
fn test_cli_version() {
    sentinel_deploy()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sentinel-deploy"));
}

#[test]
fn test_cli_deploy_help() {
    sentinel_deploy()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--skip-node2"))
        .stdout(predicate::str::contains("--tests"));
}

#[test]
fn test_cli_rollback_help() {
    sentinel_deploy()
        .args(["rollback", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("last successful deployment"));
}

#[test]
fn test_cli_invalid_command() {
    sentinel_deploy().arg("invalid-command").assert().failure();
}

#[test]
fn test_cli_unknown_node_role() {
    sentinel_deploy()
        .args(["rollback", "--node", "node3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown node role"));
}

#[test]
fn test_conflicting_deploy_flags_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["deploy", "--skip-node2", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be combined"));

    assert!(!dir.path().join("state/history.jsonl").exists());
}

#[test]
fn test_preflight_failure_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    // repo_path is not a git checkout
    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["deploy", "--non-interactive"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Pre-flight failed"));

    assert!(!dir.path().join("state/history.jsonl").exists());
}

#[test]
fn test_rollback_without_pointer_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .arg("rollback")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No rollback target"));

    assert!(!dir.path().join("state/history.jsonl").exists());
}

#[test]
fn test_history_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No deployments recorded"));
}

#[test]
fn test_history_lists_runs_and_bypass() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let state = dir.path().join("state");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(
        state.join("history.jsonl"),
        concat!(
            r#"{"deploy_id":"20260301-100000-000","status":"passed","stage":"precheck","message":"ok","commit":"abcdef0123456789","timestamp":"2026-03-01T10:00:00Z"}"#,
            "\n",
            r#"{"deploy_id":"20260301-100000-000","status":"gate_fail","stage":"node2_test","message":"failed: payment","commit":"abcdef0123456789","timestamp":"2026-03-01T10:01:00Z"}"#,
            "\n",
            r#"{"deploy_id":"20260302-100000-000","status":"success","stage":"complete","message":"deployed","commit":"fedcba9876543210","timestamp":"2026-03-02T10:05:00Z","bypass":true}"#,
            "\n",
        ),
    )
    .unwrap();

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["history", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("20260301-100000-000"))
        .stdout(predicate::str::contains("gate_fail"))
        .stdout(predicate::str::contains("\"bypass\": true"));

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["history", "--deploy-id", "20260301-100000-000", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("precheck"))
        .stdout(predicate::str::contains("node2_test"));
}

#[test]
fn test_state_dir_flag_overrides_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let other = dir.path().join("elsewhere");

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(&other)
        .args(["config", "get", "state_dir"])
        .assert()
        .success()
        .stdout(predicate::str::contains("elsewhere"));
}

#[test]
fn test_config_show_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("192.0.2.1"))
        .stdout(predicate::str::contains("branch = \"main\""));

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "nodes.production.address"])
        .assert()
        .success()
        .stdout(predicate::str::contains("192.0.2.1"));

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "nodes.production.nope"])
        .assert()
        .failure();
}

#[test]
fn test_config_path_explicit() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sentinel-deploy.toml"));
}

#[test]
fn test_missing_config_file_fails() {
    sentinel_deploy()
        .args(["--config", "/nonexistent/sentinel-deploy.toml", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_env_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    sentinel_deploy()
        .arg("--config")
        .arg(&config)
        .env("SD_BRANCH", "release")
        .args(["config", "get", "branch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("release"));
}
