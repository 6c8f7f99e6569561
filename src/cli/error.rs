//! CLI error types and conversions

use crate::config::ConfigError;
use crate::fetcher::NetworkError;
use crate::metrics::MetricsError;
use crate::output::OutputError;
use crate::registry::RegistryError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Registry error
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// Network setup error
    #[error("network error: {0}")]
    NetworkError(#[from] NetworkError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Too many devices failed; outputs were still written
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
}
