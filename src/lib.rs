//! # Energy Data Extractor Library
//!
//! Extracts time-series consumption data for metering devices from a remote
//! metering API and runs analysis passes over the extracted data.
//!
//! ## Features
//!
//! - **Concurrent Extraction**: Bounded worker pool with an overall deadline and
//!   graceful Ctrl+C cancellation
//! - **Retry & Rate Limiting**: Explicit backoff policy with jitter, `Retry-After`
//!   support and a shared request-rate limiter
//! - **Partial-Failure Aggregation**: One bad device never aborts a run; every
//!   failure is reported with its reason
//! - **Deterministic Datasets**: Results are merged by `(device, parameter)` key,
//!   never by arrival order
//! - **Analysis Passes**: Data quality, trend comparison and out-of-hours
//!   consumption findings
//!
//! ## Quick Start
//!
//! ```no_run
//! use energy_data_extractor::config::ExtractionConfig;
//! use energy_data_extractor::coordinator::{CoordinatorSettings, ExtractionCoordinator};
//! use energy_data_extractor::fetcher::SeriesFetcher;
//! use energy_data_extractor::registry::ParameterRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(ParameterRegistry::load_embedded()?);
//! let config = ExtractionConfig::load("client_config.json", &registry)?;
//!
//! let fetcher = SeriesFetcher::with_defaults(&config, registry)?;
//! let coordinator = ExtractionCoordinator::new(Arc::new(fetcher), CoordinatorSettings::default());
//! let outcome = coordinator.extract(&config).await;
//!
//! println!("{} series extracted", outcome.dataset.series_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - Extraction configuration loading and validation
//! - [`registry`] - Parameter code lookup table
//! - [`fetcher`] - HTTP client with retry/backoff and the per-series fetcher
//! - [`coordinator`] - Concurrent extraction and failure aggregation
//! - [`dataset`] - Aggregated, time-bucketed dataset
//! - [`analysis`] - Analysis passes producing findings tables
//! - [`output`] - CSV writers for datasets and findings

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Analysis passes over the aggregated dataset
pub mod analysis;

/// CLI command implementations
pub mod cli;

/// Extraction configuration
pub mod config;

/// Concurrent extraction orchestration
pub mod coordinator;

/// Aggregated dataset
pub mod dataset;

/// HTTP client and series fetcher
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Tabular output writers
pub mod output;

/// Parameter registry with per-code metadata
pub mod registry;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use config::{ConfigError, DeviceSpec, ExtractionConfig};
pub use dataset::AggregatedDataset;

/// Request granularity for series data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One reading per hour
    Hourly,
    /// One reading per calendar month
    Monthly,
}

impl Granularity {
    /// Resolution code sent to the metering API
    pub fn resolution_code(&self) -> &'static str {
        match self {
            Granularity::Hourly => "H",
            Granularity::Monthly => "M",
        }
    }

    /// Maximum span covered by a single API request
    pub fn max_window(&self) -> Duration {
        match self {
            Granularity::Hourly => Duration::days(31),
            Granularity::Monthly => Duration::days(366),
        }
    }

    /// Start of the bucket containing `ts`
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hourly => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            Granularity::Monthly => NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
                .unwrap_or(ts),
        }
    }

    /// Start of the bucket following the one that starts at `bucket`
    pub fn next_bucket(&self, bucket: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hourly => bucket + Duration::hours(1),
            Granularity::Monthly => bucket
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Granularity::Hourly => "hourly",
            Granularity::Monthly => "monthly",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Granularity::Hourly),
            "monthly" => Ok(Granularity::Monthly),
            _ => Err(format!(
                "Invalid request type: {s}. Valid options: hourly, monthly"
            )),
        }
    }
}

/// Half-open time range `[start, end)` with `start < end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    /// Create a range, rejecting empty or inverted ranges
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ConfigError> {
        if start >= end {
            return Err(ConfigError::Invalid(format!(
                "start_date ({}) must be before end_date ({})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Range start (inclusive)
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Range end (exclusive)
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Length of the range
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether `ts` falls inside `[start, end)`
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Split into request windows of at most `max_span`.
    ///
    /// Consecutive windows share their boundary instant, so callers must
    /// de-duplicate points that land exactly on a boundary.
    pub fn windows(&self, max_span: Duration) -> Vec<DateRange> {
        let mut windows = Vec::new();
        let mut current_start = self.start;

        loop {
            let window_end = (current_start + max_span).min(self.end);
            windows.push(DateRange {
                start: current_start,
                end: window_end,
            });

            if window_end >= self.end {
                break;
            }
            current_start = window_end;
        }

        windows
    }

    /// Split into `count` consecutive periods of equal length.
    ///
    /// Returns an empty vector when `count` is zero.
    pub fn split_equal(&self, count: usize) -> Vec<DateRange> {
        if count == 0 {
            return Vec::new();
        }

        let total_ms = self.duration().num_milliseconds();
        let mut periods = Vec::with_capacity(count);
        let mut current_start = self.start;

        for index in 1..=count {
            let period_end = if index == count {
                self.end
            } else {
                self.start + Duration::milliseconds(total_ms * index as i64 / count as i64)
            };
            periods.push(DateRange {
                start: current_start,
                end: period_end,
            });
            current_start = period_end;
        }

        periods
    }

    /// Start of the bucket containing `start`
    ///
    /// Earlier than `start` when the range begins partway through a bucket.
    pub fn first_bucket(&self, granularity: Granularity) -> DateTime<Utc> {
        granularity.bucket_start(self.start)
    }

    /// Whether the bucket starting at `bucket` belongs to the range's grid
    pub fn covers_bucket(&self, bucket: DateTime<Utc>, granularity: Granularity) -> bool {
        bucket >= self.first_bucket(granularity) && bucket < self.end
    }

    /// Expected bucket starts covering the range at `granularity`
    pub fn buckets(&self, granularity: Granularity) -> Vec<DateTime<Utc>> {
        let mut buckets = Vec::new();
        let mut bucket = self.first_bucket(granularity);
        while bucket < self.end {
            buckets.push(bucket);
            bucket = granularity.next_bucket(bucket);
        }
        buckets
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Key identifying one series: a device measuring one parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Device identifier
    pub device_id: u64,
    /// Parameter code (e.g. "EACTIVE")
    pub parameter: String,
}

impl SeriesKey {
    /// Create a series key
    pub fn new(device_id: u64, parameter: impl Into<String>) -> Self {
        Self {
            device_id,
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_id, self.parameter)
    }
}

/// One decoded reading; `value == None` means the API reported no value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSeriesPoint {
    /// Reading timestamp
    pub timestamp: DateTime<Utc>,
    /// Reading value, absent when the API returned null
    pub value: Option<f64>,
}

impl RawSeriesPoint {
    /// Create a point
    pub fn new(timestamp: DateTime<Utc>, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }
}

/// Outcome of fetching one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FetchStatus {
    /// Every request window succeeded
    Ok,
    /// Some windows failed; only successfully fetched points are kept
    Partial(String),
    /// Nothing could be fetched
    Failed(String),
}

impl FetchStatus {
    /// Short lowercase label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::Partial(_) => "partial",
            FetchStatus::Failed(_) => "failed",
        }
    }

    /// Whether the series contributes to the dataset
    pub fn has_data(&self) -> bool {
        !matches!(self, FetchStatus::Failed(_))
    }
}

/// A fetched series, frozen once the fetcher returns it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedSeries {
    /// Device identifier
    pub device_id: u64,
    /// Device display name
    pub name: String,
    /// Parameter code
    pub parameter: String,
    /// Client name of the credential that served the data
    pub client_name: Option<String>,
    /// Points in chronological order without duplicate timestamps
    pub points: Vec<RawSeriesPoint>,
    /// Fetch outcome
    pub status: FetchStatus,
}

impl ExtractedSeries {
    /// Build a failed series with no points
    pub fn failed(device: &DeviceSpec, reason: impl Into<String>) -> Self {
        Self {
            device_id: device.device_id,
            name: device.name.clone(),
            parameter: device.parameter.clone(),
            client_name: None,
            points: Vec::new(),
            status: FetchStatus::Failed(reason.into()),
        }
    }

    /// Key of this series
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.device_id, self.parameter.clone())
    }
}
