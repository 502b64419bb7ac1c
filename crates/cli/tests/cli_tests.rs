//! CLI integration tests

use std::process::{Command, Output};
use tempfile::TempDir;

const MINER: &str = r#"{"name": "miner", "type": "cryptomining",
    "checks": [{"type": "process_check", "cpu_threshold": 90}]}"#;

fn protectctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_protectctl"))
        .args(args)
        .env_remove("PROTECT_API_URL")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = protectctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Protect"), "Should show app name");
    assert!(stdout.contains("flags"), "Should show flags command");
    assert!(stdout.contains("strategies"), "Should show strategies command");
    assert!(stdout.contains("status"), "Should show status command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = protectctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("protectctl"), "Should show binary name");
}

#[test]
fn test_flags_list_help() {
    let output = protectctl(&["flags", "list", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--suspended"), "Should show suspended option");
}

#[test]
fn test_flags_release_requires_uuid() {
    let output = protectctl(&["flags", "release"]);
    assert!(!output.status.success(), "Release without uuid should fail");
}

#[test]
fn test_validate_accepts_valid_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("miner.protect"), MINER).unwrap();

    let output = protectctl(&[
        "--format",
        "json",
        "strategies",
        "validate",
        dir.path().to_str().unwrap(),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["strategies"][0]["name"], "miner");
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);
}

#[test]
fn test_validate_fails_on_rejected_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("miner.protect"), MINER).unwrap();
    std::fs::write(
        dir.path().join("escape.protect"),
        r#"{"name": "escape", "type": "t", "checks": [{"type": "file_existence", "path": "../../etc/passwd"}]}"#,
    )
    .unwrap();

    let output = protectctl(&["strategies", "validate", dir.path().to_str().unwrap()]);

    assert!(!output.status.success(), "Rejected files should fail validation");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("escape.protect"));
}

#[test]
fn test_flags_list_against_agent() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/flags")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"records": [{
                "container_uuid": "d3adb33f",
                "server_id": "12",
                "flags": [],
                "first_detected_at": "2024-05-01T10:00:00Z",
                "last_action_at": "2024-05-01T10:00:00Z",
                "suspended": true
            }], "total": 1}"#,
        )
        .create();

    let output = protectctl(&["--api-url", &server.url(), "--format", "json", "flags", "list"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    mock.assert();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("d3adb33f"));
}

#[test]
fn test_unreachable_agent_fails() {
    let output = protectctl(&["--api-url", "http://127.0.0.1:1", "status"]);
    assert!(!output.status.success(), "Status against a dead agent should fail");
}
