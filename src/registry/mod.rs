//! Parameter registry for metering parameter codes
//!
//! The registry is an immutable lookup table built once from embedded JSON and
//! passed explicitly to the components that need it (config validation and the
//! series fetcher). It is never consulted through global state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("parameters.json");

/// Aggregation the metering API applies when resampling a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Difference between consecutive accumulated readings (consumption)
    Delta,
    /// Average of instantaneous readings
    Avg,
}

impl Operation {
    /// Value of the `operation` query parameter
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Operation::Delta => "DELTA",
            Operation::Avg => "AVG",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query_value())
    }
}

/// Registry entry describing one parameter code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter code (e.g. "EACTIVE")
    pub code: String,
    /// Resampling operation requested from the API
    pub operation: Operation,
    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Measurement unit
    #[serde(default)]
    pub unit: Option<String>,
}

impl ParameterInfo {
    /// Whether readings of this parameter represent consumption
    pub fn is_consumption(&self) -> bool {
        self.operation == Operation::Delta
    }
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    parameters: Vec<ParameterInfo>,
}

/// Registry of known parameter codes
#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    schema_version: String,
    entries: HashMap<String, ParameterInfo>,
}

impl ParameterRegistry {
    /// Load the registry shipped with the crate
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse a registry from JSON
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let mut entries = HashMap::with_capacity(raw.parameters.len());
        for entry in raw.parameters {
            if entries.contains_key(&entry.code) {
                return Err(RegistryError::ParseError(format!(
                    "Duplicate parameter code in registry: {}",
                    entry.code
                )));
            }
            entries.insert(entry.code.clone(), entry);
        }

        Ok(Self {
            schema_version: raw.schema_version,
            entries,
        })
    }

    /// Registry schema version
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Look up a parameter code
    pub fn get(&self, code: &str) -> Option<&ParameterInfo> {
        self.entries.get(code)
    }

    /// Whether the code is known
    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    /// Operation to request for `code`, defaulting to [`Operation::Delta`]
    /// for codes the registry does not know.
    pub fn operation_for(&self, code: &str) -> Operation {
        self.get(code)
            .map(|info| info.operation)
            .unwrap_or(Operation::Delta)
    }

    /// Number of registered codes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All codes, sorted
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Registry JSON could not be parsed
    #[error("parse error: {0}")]
    ParseError(String),
}
