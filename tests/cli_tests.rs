//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the wsrelay binary
fn relay_cmd() -> Command {
    Command::cargo_bin("wsrelay").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    relay_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("wsrelay"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    relay_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wsrelay"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    relay_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wsrelay"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_validate_valid_fixture() {
    relay_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_invalid_fixture() {
    relay_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::invalid_config_fixture())
        .assert()
        .failure()
        .stderr(predicate::str::contains("ws:// or wss://"));
}

#[test]
fn test_config_validate_missing_file() {
    relay_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/wsrelay.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_show_prints_toml() {
    relay_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .env_remove("WEBSOCKET_SERVER_URL")
        .assert()
        .success()
        .stdout(predicate::str::contains("[upstream]"))
        .stdout(predicate::str::contains("messages.example.com"));
}

#[test]
fn test_config_init_creates_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("config.toml");

    relay_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));

    assert!(path.exists());
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[upstream]"));
    assert!(content.contains("max_retry_count"));
}

#[test]
fn test_config_init_refuses_overwrite_without_force() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "# existing\n").unwrap();

    relay_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_reach_config_show() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[upstream]\nurl = \"ws://file.example.com\"\n").unwrap();

    relay_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(&path)
        .env("WEBSOCKET_SERVER_URL", "wss://env.example.com")
        .env("MAX_CONNECTION_RETRY_COUNT", "9")
        .env("CONNECTION_RETRY_DEBOUNCE", "1234")
        .assert()
        .success()
        .stdout(predicate::str::contains("wss://env.example.com"))
        .stdout(predicate::str::contains("max_retry_count = 9"))
        .stdout(predicate::str::contains("retry_debounce_ms = 1234"));
}

// ─────────────────────────────────────────────────────────────────
// Run Command Failure Modes
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_without_url_fails_validation() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[upstream]\nurl = \"\"\n").unwrap();

    relay_cmd()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .env_remove("WEBSOCKET_SERVER_URL")
        .assert()
        .failure()
        .stderr(predicate::str::contains("WEBSOCKET_SERVER_URL"));
}

#[test]
fn test_exhausted_retry_budget_exits_with_status_one() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    // Nothing listens on this port; two attempts with a short debounce
    std::fs::write(
        &path,
        r#"
[upstream]
url = "ws://127.0.0.1:9"
max_retry_count = 2
retry_debounce_ms = 50
connect_timeout_ms = 1000

[http]
enabled = false
"#,
    )
    .unwrap();

    relay_cmd()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Gave up connecting"));
}
