//! Integration tests for the `loxone` binary.
//!
//! Argument parsing, profile handling and unauthenticated discovery, all
//! without a live Miniserver.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// The `loxone` binary with its config directory at `home` and no
/// `LOXONE_*` variables inherited.
fn loxone_cmd_in(home: &str) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("loxone");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env_remove("RUST_LOG")
        .env_remove("LOXONE_PROFILE")
        .env_remove("LOXONE_HOST")
        .env_remove("LOXONE_PORT")
        .env_remove("LOXONE_USERNAME")
        .env_remove("LOXONE_PASSWORD")
        .env_remove("LOXONE_OUTPUT")
        .env_remove("LOXONE_TIMEOUT")
        .env_remove("LOXONE_DEFAULT_PROFILE");
    cmd
}

fn loxone_cmd() -> assert_cmd::Command {
    loxone_cmd_in("/tmp/loxone-cli-test-nonexistent")
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = loxone_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    loxone_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Miniserver")
            .and(predicate::str::contains("stream"))
            .and(predicate::str::contains("controls"))
            .and(predicate::str::contains("send")),
    );
}

#[test]
fn test_version_flag() {
    loxone_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("loxone"));
}

#[test]
fn test_unknown_output_format_is_usage_error() {
    loxone_cmd()
        .args(["-o", "yaml", "controls"])
        .assert()
        .code(2);
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_config_path_points_into_config_home() {
    loxone_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("loxone").and(predicate::str::contains("config.toml")));
}

#[test]
fn test_controls_without_config_explains_setup() {
    let output = loxone_cmd().arg("controls").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("No Miniserver configured"));
}

#[test]
fn test_missing_named_profile_is_not_found() {
    let output = loxone_cmd()
        .args(["--profile", "cabin", "send", "Kitchen Light", "on"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("cabin"));
}

#[test]
fn test_config_init_then_profiles() {
    let home = tempfile::tempdir().unwrap();
    let home = home.path().to_str().unwrap().to_owned();

    loxone_cmd_in(&home)
        .args([
            "--host",
            "192.168.1.77",
            "--username",
            "admin",
            "config",
            "init",
            "home",
            "--password-env",
            "HOME_MS_PASSWORD",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved profile 'home'"));

    loxone_cmd_in(&home)
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("home (default)"));
}

#[test]
fn test_profile_without_password_reports_credentials() {
    let home = tempfile::tempdir().unwrap();
    let home = home.path().to_str().unwrap().to_owned();

    loxone_cmd_in(&home)
        .args([
            "--host",
            "192.168.1.77",
            "--username",
            "admin",
            "config",
            "init",
            "--password-env",
            "LOXONE_CLI_TEST_UNSET",
        ])
        .assert()
        .success();

    let output = loxone_cmd_in(&home)
        .env_remove("LOXONE_CLI_TEST_UNSET")
        .arg("controls")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("No credentials"));
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_info_prints_discovery_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jdev/cfg/apiKey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "LL": {
                "control": "dev/cfg/apiKey",
                "value": "{'snr': '50:4F:94:AA:BB:CC', 'version':'14.5.12.7', 'key':'3A', 'local':true, 'httpsStatus':1}",
                "Code": "200"
            }
        })))
        .mount(&server)
        .await;

    let port = server.address().port().to_string();
    let output = loxone_cmd()
        .args(["--host", "127.0.0.1", "--port", &port, "-o", "json", "info"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["version"], "14.5.12.7");
    assert_eq!(info["serial"], "50:4F:94:AA:BB:CC");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_info_unreachable_host_is_connection_error() {
    // Bind and drop to find a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port().to_string()
    };
    let output = loxone_cmd()
        .args(["--host", "127.0.0.1", "--port", &port, "--timeout", "2", "info"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7), "{}", combined_output(&output));
}
