//! Analysis passes over the aggregated dataset
//!
//! Every pass is a pure function of the dataset and its config and returns an
//! ordered findings table. A pass fails only when its structural precondition
//! is unmet (invalid thresholds, parameter missing from the dataset); devices
//! with missing data get a flagged row of their own.

use serde::Serialize;

use crate::config::ConfigError;
use crate::dataset::{AggregatedDataset, DeviceView};

pub mod out_of_hours;
pub mod quality;
pub mod trend;

pub use out_of_hours::{OutOfHoursConfig, OutOfHoursMetrics, OutOfHoursPass};
pub use quality::{QualityConfig, QualityMetrics, QualityPass};
pub use trend::{TrendConfig, TrendDirection, TrendMetrics, TrendPass};

/// Reason used for devices without any present reading
pub const NO_DATA_REASON: &str = "no data available";

/// One row of a findings table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingsRow<M> {
    /// Device identifier
    pub device_id: u64,
    /// Device display name
    pub name: String,
    /// Parameter code
    pub parameter: String,
    /// Period, day or range the row describes
    pub period: String,
    /// Computed metrics, `None` when the device has no data
    pub metrics: Option<M>,
    /// Whether the row needs attention
    pub flagged: bool,
    /// Why the row was flagged; empty otherwise
    pub reason: String,
}

impl<M> FindingsRow<M> {
    /// Flagged row for a device with no present readings
    pub fn no_data(view: &DeviceView<'_>, period: impl Into<String>) -> Self {
        let reason = match view.failure {
            Some(failure) => format!("{NO_DATA_REASON} (fetch failed: {failure})"),
            None => NO_DATA_REASON.to_string(),
        };
        Self {
            device_id: view.key.device_id,
            name: view.name.to_string(),
            parameter: view.key.parameter.clone(),
            period: period.into(),
            metrics: None,
            flagged: true,
            reason,
        }
    }

    /// Row carrying metrics
    pub fn with_metrics(
        view: &DeviceView<'_>,
        period: impl Into<String>,
        metrics: M,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            device_id: view.key.device_id,
            name: view.name.to_string(),
            parameter: view.key.parameter.clone(),
            period: period.into(),
            metrics: Some(metrics),
            flagged: !reasons.is_empty(),
            reason: reasons.join("; "),
        }
    }
}

/// Pass-specific metric columns for tabular output
pub trait MetricColumns {
    /// Column headers, in order
    fn headers() -> &'static [&'static str];

    /// Cell values, in header order
    fn values(&self) -> Vec<String>;
}

/// Analysis over an [`AggregatedDataset`]
pub trait AnalysisPass {
    /// Pass configuration
    type Config;

    /// Metrics carried by each row
    type Metrics: MetricColumns;

    /// Short pass name
    fn name(&self) -> &'static str;

    /// Run the pass
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the config is invalid or its parameter is
    /// not part of the dataset
    fn analyze(
        &self,
        dataset: &AggregatedDataset,
        config: &Self::Config,
    ) -> Result<Vec<FindingsRow<Self::Metrics>>, ConfigError>;
}

/// Fail unless `parameter` is part of the dataset
pub fn require_parameter(dataset: &AggregatedDataset, parameter: &str) -> Result<(), ConfigError> {
    if dataset.has_parameter(parameter) {
        return Ok(());
    }
    Err(ConfigError::MissingParameter {
        parameter: parameter.to_string(),
        available: dataset
            .parameters()
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Fail unless `value` lies in `[0, 100]`
pub fn require_percentage(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be between 0 and 100, got {value}"
        )))
    }
}

pub(crate) fn format_number(value: f64) -> String {
    format!("{value:.2}")
}

pub(crate) fn format_optional(value: Option<f64>) -> String {
    value.map(format_number).unwrap_or_default()
}
