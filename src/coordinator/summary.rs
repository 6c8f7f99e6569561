//! Extraction run summary and aggregate failure reporting

use serde::Serialize;
use std::fmt;

use crate::{ExtractedSeries, FetchStatus};

/// One device that did not fully succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    /// Device identifier
    pub device_id: u64,
    /// Device display name
    pub name: String,
    /// Parameter code
    pub parameter: String,
    /// Failure reason
    pub reason: String,
}

impl DeviceOutcome {
    fn from_series(series: &ExtractedSeries, reason: &str) -> Self {
        Self {
            device_id: series.device_id,
            name: series.name.clone(),
            parameter: series.parameter.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Raised when too many devices failed; informational only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateFailure {
    /// Failed devices
    pub failed: usize,
    /// Devices requested
    pub total: usize,
    /// Configured fraction that triggers the report
    pub threshold: f64,
}

impl AggregateFailure {
    /// Failed fraction of the run
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    /// Whether nothing succeeded
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.failed == self.total
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} devices failed ({:.1}% > {:.1}% threshold)",
            self.failed,
            self.total,
            self.failure_ratio() * 100.0,
            self.threshold * 100.0
        )
    }
}

/// Side-channel summary of one extraction run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionSummary {
    /// Devices requested
    pub total: usize,
    /// Devices whose series fetched completely
    pub succeeded: usize,
    /// Devices with some failed windows
    pub partial: Vec<DeviceOutcome>,
    /// Devices without data
    pub failed: Vec<DeviceOutcome>,
    /// Set when failures exceed the configured fraction
    pub aggregate_failure: Option<AggregateFailure>,
}

impl ExtractionSummary {
    /// Build a summary from series in config order
    pub fn from_series<'a, I>(series: I, failure_threshold: f64) -> Self
    where
        I: IntoIterator<Item = &'a ExtractedSeries>,
    {
        let mut total = 0;
        let mut succeeded = 0;
        let mut partial = Vec::new();
        let mut failed = Vec::new();

        for item in series {
            total += 1;
            match &item.status {
                FetchStatus::Ok => succeeded += 1,
                FetchStatus::Partial(reason) => partial.push(DeviceOutcome::from_series(item, reason)),
                FetchStatus::Failed(reason) => failed.push(DeviceOutcome::from_series(item, reason)),
            }
        }

        let candidate = AggregateFailure {
            failed: failed.len(),
            total,
            threshold: failure_threshold,
        };
        let aggregate_failure = (candidate.failure_ratio() > failure_threshold || candidate.all_failed())
            .then_some(candidate);

        Self {
            total,
            succeeded,
            partial,
            failed,
            aggregate_failure,
        }
    }

    /// Whether every device fetched completely
    pub fn is_complete(&self) -> bool {
        self.partial.is_empty() && self.failed.is_empty()
    }
}
