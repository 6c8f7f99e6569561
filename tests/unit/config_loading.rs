//! Unit tests for loading extraction configs from disk

use chrono::{TimeZone, Utc};
use energy_data_extractor::registry::ParameterRegistry;
use energy_data_extractor::{ConfigError, ExtractionConfig, Granularity};
use std::io::Write;
use tempfile::NamedTempFile;

fn registry() -> ParameterRegistry {
    ParameterRegistry::load_embedded().unwrap()
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_monthly_config_with_several_keys() {
    let file = config_file(
        r#"{
            "api_keys": [
                {"token": "first", "client_name": "North"},
                {"token": "second"}
            ],
            "params": ["EACTIVE", "POWER"],
            "request_type": "monthly",
            "start_date": "2023-01-01T00:00:00+01:00",
            "end_date": "2024-01-01",
            "devices": [
                {"device_id": 10, "name": "Plant", "param": "EACTIVE"},
                {"device_id": 10, "name": "Plant", "param": "POWER"}
            ]
        }"#,
    );

    let config = ExtractionConfig::load(file.path(), &registry()).unwrap();

    assert_eq!(config.granularity(), Granularity::Monthly);
    assert_eq!(config.api_keys().len(), 2);
    assert_eq!(config.api_keys()[0].client_name, "North");
    assert_eq!(config.api_keys()[1].client_name, "Unknown Client");
    assert_eq!(
        config.date_range().start(),
        Utc.with_ymd_and_hms(2022, 12, 31, 23, 0, 0).unwrap()
    );
    assert_eq!(config.devices().len(), 2);
    assert_eq!(
        config.parameters().iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["EACTIVE", "POWER"]
    );
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ExtractionConfig::load("/nonexistent/extraction.json", &registry());
    assert!(matches!(result, Err(ConfigError::ReadError { .. })));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = config_file("{ not json");
    let result = ExtractionConfig::load(file.path(), &registry());
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_validation_errors_surface_from_file() {
    let file = config_file(
        r#"{
            "api_keys": [{"token": "t"}],
            "params": ["EACTIVE"],
            "request_type": "daily",
            "start_date": "2024-01-01",
            "end_date": "2024-01-02",
            "devices": [{"device_id": 1, "name": "M", "param": "EACTIVE"}]
        }"#,
    );
    let result = ExtractionConfig::load(file.path(), &registry());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
