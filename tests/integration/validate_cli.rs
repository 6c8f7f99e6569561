//! Integration tests for the validate command

use assert_cmd::Command;
use energy_data_extractor::cli::{OutputFormat, ValidateCommand};
use std::path::Path;
use tempfile::tempdir;

const VALID: &str = r#"{
    "api_keys": [{"token": "abc", "client_name": "ILIM"}],
    "params": ["EACTIVE"],
    "request_type": "hourly",
    "start_date": "2024-01-01",
    "end_date": "2024-03-01",
    "devices": [{"device_id": 7, "name": "Main", "param": "EACTIVE"}]
}"#;

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_validate_binary_accepts_valid_config() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), VALID);

    let output = Command::cargo_bin("energy-extract")
        .unwrap()
        .arg("validate")
        .arg(&path)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Valid config"));
    assert!(stdout.contains("Granularity: hourly"));
    // 60 days in 31-day windows
    assert!(stdout.contains("Requests per device: 2"));
}

#[test]
fn test_validate_binary_json_output() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), VALID);

    let output = Command::cargo_bin("energy-extract")
        .unwrap()
        .args(["--output-format", "json", "validate"])
        .arg(&path)
        .output()
        .unwrap();

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["valid"], true);
    assert_eq!(value["devices"], 1);
    assert_eq!(value["granularity"], "hourly");
}

#[test]
fn test_validate_binary_rejects_unknown_parameter() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), &VALID.replace("\"EACTIVE\"]", "\"NOT_A_PARAM\"]"));

    Command::cargo_bin("energy-extract")
        .unwrap()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_validate_binary_rejects_missing_file() {
    Command::cargo_bin("energy-extract")
        .unwrap()
        .args(["validate", "/nonexistent/config.json"])
        .assert()
        .failure();
}

#[tokio::test]
async fn test_validate_command_reports_config_error() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), r#"{"api_keys": []}"#);

    let cmd = ValidateCommand { config: path };
    assert!(cmd.execute(OutputFormat::Human).await.is_err());
}
