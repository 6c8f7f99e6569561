//! Extraction configuration loading and validation
//!
//! The JSON file is deserialised into a raw shape and then validated into an
//! immutable [`ExtractionConfig`]. Every check runs before any network call.

use crate::registry::ParameterRegistry;
use crate::{DateRange, Granularity};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {message}")]
    ReadError {
        /// Path that failed
        path: String,
        /// Underlying error message
        message: String,
    },

    /// Malformed JSON or missing/mistyped fields
    #[error("invalid config JSON: {0}")]
    ParseError(String),

    /// Semantically invalid configuration
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A required parameter is absent from a dataset
    #[error("parameter {parameter} is not part of the dataset (available: {available})")]
    MissingParameter {
        /// Requested parameter
        parameter: String,
        /// Comma separated list of available parameters
        available: String,
    },
}

/// One credential for the metering API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    /// Token sent in the request header
    pub token: String,
    /// Client the token belongs to
    pub client_name: String,
}

/// One fetch unit: a device and the parameter to retrieve for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Numeric device identifier
    pub device_id: u64,
    /// Device display name
    pub name: String,
    /// Parameter code
    pub parameter: String,
}

/// Validated, immutable extraction configuration
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    api_keys: Vec<ApiKey>,
    parameters: BTreeSet<String>,
    granularity: Granularity,
    date_range: DateRange,
    devices: Vec<DeviceSpec>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    api_keys: Vec<RawApiKey>,
    params: Vec<String>,
    request_type: String,
    start_date: String,
    end_date: String,
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawApiKey {
    token: String,
    #[serde(default)]
    client_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    device_id: u64,
    name: String,
    param: String,
}

const UNKNOWN_CLIENT: &str = "Unknown Client";

impl ExtractionConfig {
    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P, registry: &ParameterRegistry) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_json_str(&json, registry)
    }

    /// Parse and validate a config from a JSON string
    pub fn from_json_str(json: &str, registry: &ParameterRegistry) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::from_raw(raw, registry)
    }

    fn from_raw(raw: RawConfig, registry: &ParameterRegistry) -> Result<Self, ConfigError> {
        if raw.api_keys.is_empty() {
            return Err(ConfigError::Invalid("api_keys must not be empty".to_string()));
        }
        let api_keys = raw
            .api_keys
            .into_iter()
            .enumerate()
            .map(|(index, key)| {
                if key.token.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "api_keys[{index}].token must not be empty"
                    )));
                }
                Ok(ApiKey {
                    token: key.token,
                    client_name: key
                        .client_name
                        .filter(|name| !name.trim().is_empty())
                        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let granularity = Granularity::from_str(&raw.request_type).map_err(ConfigError::Invalid)?;

        let start = parse_config_date(&raw.start_date, "start_date")?;
        let end = parse_config_date(&raw.end_date, "end_date")?;
        let date_range = DateRange::new(start, end)?;

        if raw.params.is_empty() {
            return Err(ConfigError::Invalid("params must not be empty".to_string()));
        }
        let mut parameters = BTreeSet::new();
        for code in raw.params {
            if !registry.contains(&code) {
                return Err(ConfigError::Invalid(format!("unknown parameter code: {code}")));
            }
            parameters.insert(code);
        }

        if raw.devices.is_empty() {
            return Err(ConfigError::Invalid("devices must not be empty".to_string()));
        }
        let mut seen = HashSet::with_capacity(raw.devices.len());
        let mut devices = Vec::with_capacity(raw.devices.len());
        for device in raw.devices {
            if !parameters.contains(&device.param) {
                return Err(ConfigError::Invalid(format!(
                    "device {} ({}) uses parameter {} which is not listed in params",
                    device.device_id, device.name, device.param
                )));
            }
            if !seen.insert((device.device_id, device.param.clone())) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device entry: {} / {}",
                    device.device_id, device.param
                )));
            }
            devices.push(DeviceSpec {
                device_id: device.device_id,
                name: device.name,
                parameter: device.param,
            });
        }

        Ok(Self {
            api_keys,
            parameters,
            granularity,
            date_range,
            devices,
        })
    }

    /// Credentials in the order they are tried
    pub fn api_keys(&self) -> &[ApiKey] {
        &self.api_keys
    }

    /// Requested parameter codes
    pub fn parameters(&self) -> &BTreeSet<String> {
        &self.parameters
    }

    /// Request granularity
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Requested date range
    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    /// Devices to fetch, in config order
    pub fn devices(&self) -> &[DeviceSpec] {
        &self.devices
    }
}

/// Parse a config date.
///
/// Accepts RFC 3339 with an offset, a date-time without offset (taken as UTC)
/// and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_config_date(input: &str, field: &str) -> Result<DateTime<Utc>, ConfigError> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ConfigError::Invalid(format!("{field} is not a valid ISO-8601 date: '{input}'")))
}
