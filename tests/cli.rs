//! CLI integration tests. No test reaches the network: each one stops at
//! configuration or session handling.
//!
//! Each test uses an isolated temp directory for config and session files,
//! so tests can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn session_file(&self) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child("session.toml")
    }

    /// A command with no ambient configuration at all.
    fn bare_cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("coventure").expect("failed to find binary");
        cmd.env("NO_COLOR", "1")
            .env("HOME", self.temp_dir.path())
            .env("XDG_CONFIG_HOME", self.temp_dir.path())
            .env_remove("COVENTURE_CONFIG")
            .env_remove("COVENTURE_BACKEND_URL")
            .env_remove("COVENTURE_API_KEY")
            .env_remove("COVENTURE_SESSION_FILE")
            .env_remove("RUST_LOG");
        cmd
    }

    /// A command configured for an unreachable backend.
    fn cmd(&self) -> Command {
        let mut cmd = self.bare_cmd();
        cmd.env("COVENTURE_BACKEND_URL", "http://127.0.0.1:9")
            .env("COVENTURE_API_KEY", "test-anon-key")
            .env("COVENTURE_SESSION_FILE", self.session_file().path());
        cmd
    }

    fn write_session(&self, user_id: &str) {
        self.session_file()
            .write_str(&format!(
                "[default]\nuser_id = \"{user_id}\"\naccess_token = \"token-{user_id}\"\n"
            ))
            .expect("write session");
    }
}

#[test]
fn test_help_lists_commands() {
    let ctx = TestContext::new();
    ctx.bare_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("feed"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("apply"));
}

#[test]
fn test_missing_backend_url_is_fatal() {
    let ctx = TestContext::new();
    ctx.bare_cmd()
        .arg("feed")
        .assert()
        .failure()
        .stderr(predicate::str::contains("backend URL is not set"));
}

#[test]
fn test_missing_api_key_is_fatal() {
    let ctx = TestContext::new();
    ctx.bare_cmd()
        .env("COVENTURE_BACKEND_URL", "https://abc.example.co")
        .arg("feed")
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key is not set"));
}

#[test]
fn test_config_file_supplies_settings() {
    let ctx = TestContext::new();
    let config = ctx.temp_dir.child("coventure.toml");
    config
        .write_str(&format!(
            "backend_url = \"http://127.0.0.1:9\"\napi_key = \"from-file\"\nsession_file = {:?}\n\n[realtime]\nmax_retries = 5\n",
            ctx.session_file().path()
        ))
        .unwrap();

    ctx.bare_cmd()
        .args(["--config", config.path().to_str().unwrap(), "logout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No session found."));
}

#[test]
fn test_unknown_status_policy_is_rejected() {
    let ctx = TestContext::new();
    let config = ctx.temp_dir.child("coventure.toml");
    config.write_str("status_policy = \"whenever\"\n").unwrap();

    ctx.cmd()
        .args(["--config", config.path().to_str().unwrap(), "logout"])
        .assert()
        .failure();
}

#[test]
fn test_whoami_requires_session() {
    let ctx = TestContext::new();
    ctx.cmd()
        .arg("whoami")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not signed in"));
}

#[test]
fn test_logout_without_session() {
    let ctx = TestContext::new();
    ctx.cmd()
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("No session found."));
}

#[test]
fn test_logout_removes_session() {
    let ctx = TestContext::new();
    ctx.write_session("dave");

    ctx.cmd()
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed out."));
    ctx.session_file().assert(predicate::path::missing());

    ctx.cmd()
        .arg("applications")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not signed in"));
}

#[test]
fn test_login_with_stdin_requires_email() {
    let ctx = TestContext::new();
    ctx.cmd()
        .args(["login", "--password-stdin"])
        .write_stdin("hunter22\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--email is required"));
}

#[test]
fn test_apply_requires_project_id() {
    let ctx = TestContext::new();
    ctx.cmd().arg("apply").assert().failure();
}
