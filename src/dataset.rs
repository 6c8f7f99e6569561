//! Aggregated, time-bucketed dataset
//!
//! Built once per extraction run by [`DatasetBuilder`] and read-only after
//! [`DatasetBuilder::build`]. Series are keyed by `(device_id, parameter)` and
//! their points are resampled onto the bucket grid of the requested
//! granularity. Failed series contribute no rows; gaps stay gaps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::{DateRange, ExtractedSeries, FetchStatus, Granularity, SeriesKey};

/// One series in the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEntry {
    /// Device display name
    pub name: String,
    /// Client of the credential that served the data
    pub client_name: Option<String>,
    /// Fetch outcome (never `Failed`)
    pub status: FetchStatus,
    /// Bucket start -> value; `None` is an explicit absent reading
    pub values: BTreeMap<DateTime<Utc>, Option<f64>>,
}

impl SeriesEntry {
    /// Present readings in chronological order
    pub fn present_values(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.values
            .iter()
            .filter_map(|(ts, value)| value.map(|v| (*ts, v)))
    }

    /// Number of present readings
    pub fn present_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }

    /// Whether at least one reading is present
    pub fn has_present_values(&self) -> bool {
        self.values.values().any(Option::is_some)
    }

    /// Sum of present readings with `start <= ts < end`
    pub fn sum_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        self.values
            .range(start..end)
            .filter_map(|(_, value)| *value)
            .sum()
    }

    /// Whether any present reading falls in `[start, end)`
    pub fn has_values_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.values.range(start..end).any(|(_, value)| value.is_some())
    }
}

/// A device series as seen by an analysis pass
#[derive(Debug, Clone, Copy)]
pub struct DeviceView<'a> {
    /// Series key
    pub key: &'a SeriesKey,
    /// Device display name
    pub name: &'a str,
    /// Series data, `None` when the fetch failed
    pub entry: Option<&'a SeriesEntry>,
    /// Fetch failure reason
    pub failure: Option<&'a str>,
}

impl DeviceView<'_> {
    /// Whether the device has at least one present reading
    pub fn has_data(&self) -> bool {
        self.entry.map(SeriesEntry::has_present_values).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FailedSeries {
    name: String,
    reason: String,
}

/// One flattened row: timestamp x device x parameter x value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRow<'a> {
    /// Bucket start
    pub timestamp: DateTime<Utc>,
    /// Device identifier
    pub device_id: u64,
    /// Device display name
    pub device_name: &'a str,
    /// Client name
    pub client_name: Option<&'a str>,
    /// Parameter code
    pub parameter: &'a str,
    /// Value, `None` when absent
    pub value: Option<f64>,
}

/// Counts describing a dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    /// Flattened rows
    pub records: usize,
    /// Rows with a present value
    pub present_records: usize,
    /// Distinct devices with data
    pub devices: usize,
    /// Series with data
    pub series: usize,
    /// Devices requested in the run
    pub requested_devices: usize,
    /// Parameter codes
    pub parameters: Vec<String>,
    /// Share of requested series that produced data, in percent
    pub success_rate: f64,
}

/// Read-only dataset produced by one extraction run
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedDataset {
    range: DateRange,
    granularity: Granularity,
    parameters: BTreeSet<String>,
    requested_series: usize,
    series: BTreeMap<SeriesKey, SeriesEntry>,
    failed: BTreeMap<SeriesKey, FailedSeries>,
}

impl AggregatedDataset {
    /// Requested range
    pub fn range(&self) -> DateRange {
        self.range
    }

    /// Bucket granularity
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Parameter codes the dataset was requested for
    pub fn parameters(&self) -> &BTreeSet<String> {
        &self.parameters
    }

    /// Whether `parameter` is part of the dataset
    pub fn has_parameter(&self, parameter: &str) -> bool {
        self.parameters.contains(parameter)
    }

    /// Expected bucket starts over the range
    pub fn grid(&self) -> Vec<DateTime<Utc>> {
        self.range.buckets(self.granularity)
    }

    /// Look up one series
    pub fn get(&self, key: &SeriesKey) -> Option<&SeriesEntry> {
        self.series.get(key)
    }

    /// All series in key order
    pub fn series(&self) -> impl Iterator<Item = (&SeriesKey, &SeriesEntry)> {
        self.series.iter()
    }

    /// Every requested device measuring `parameter`, failed ones included,
    /// in device order
    pub fn devices_for_parameter<'a>(&'a self, parameter: &str) -> Vec<DeviceView<'a>> {
        let mut views: Vec<DeviceView<'a>> = self
            .series
            .iter()
            .filter(|(key, _)| key.parameter == parameter)
            .map(|(key, entry)| DeviceView {
                key,
                name: entry.name.as_str(),
                entry: Some(entry),
                failure: None,
            })
            .chain(
                self.failed
                    .iter()
                    .filter(|(key, _)| key.parameter == parameter)
                    .map(|(key, failed)| DeviceView {
                        key,
                        name: failed.name.as_str(),
                        entry: None,
                        failure: Some(failed.reason.as_str()),
                    }),
            )
            .collect();
        views.sort_by(|a, b| a.key.cmp(b.key));
        views
    }

    /// Number of series with data
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Number of distinct devices with data
    pub fn device_count(&self) -> usize {
        self.series
            .keys()
            .map(|key| key.device_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Whether no series produced data
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Flattened rows ordered by device, parameter, timestamp
    pub fn rows(&self) -> impl Iterator<Item = DatasetRow<'_>> {
        self.series.iter().flat_map(|(key, entry)| {
            entry.values.iter().map(move |(ts, value)| DatasetRow {
                timestamp: *ts,
                device_id: key.device_id,
                device_name: entry.name.as_str(),
                client_name: entry.client_name.as_deref(),
                parameter: key.parameter.as_str(),
                value: *value,
            })
        })
    }

    /// Number of flattened rows
    pub fn record_count(&self) -> usize {
        self.series.values().map(|entry| entry.values.len()).sum()
    }

    /// Summary counts
    pub fn summary(&self) -> DatasetSummary {
        let success_rate = if self.requested_series == 0 {
            0.0
        } else {
            self.series.len() as f64 / self.requested_series as f64 * 100.0
        };

        DatasetSummary {
            records: self.record_count(),
            present_records: self.series.values().map(SeriesEntry::present_count).sum(),
            devices: self.device_count(),
            series: self.series.len(),
            requested_devices: self.requested_series,
            parameters: self.parameters.iter().cloned().collect(),
            success_rate,
        }
    }
}

/// Accumulates fetched series before the dataset is published
#[derive(Debug)]
pub struct DatasetBuilder {
    range: DateRange,
    granularity: Granularity,
    parameters: BTreeSet<String>,
    requested_series: usize,
    series: BTreeMap<SeriesKey, SeriesEntry>,
    failed: BTreeMap<SeriesKey, FailedSeries>,
}

impl DatasetBuilder {
    /// Start a dataset for the given range and parameters
    pub fn new(
        range: DateRange,
        granularity: Granularity,
        parameters: BTreeSet<String>,
        requested_series: usize,
    ) -> Self {
        Self {
            range,
            granularity,
            parameters,
            requested_series,
            series: BTreeMap::new(),
            failed: BTreeMap::new(),
        }
    }

    /// Merge a fetched series
    ///
    /// Points are bucketed; points whose bucket is off the grid and second
    /// points in an already filled bucket are discarded. Failed series
    /// contribute no rows, only their key and reason are remembered.
    pub fn insert(&mut self, series: ExtractedSeries) {
        let key = series.key();
        if let FetchStatus::Failed(reason) = series.status {
            self.failed.insert(
                key,
                FailedSeries {
                    name: series.name,
                    reason,
                },
            );
            return;
        }

        let mut values = BTreeMap::new();
        let mut discarded = 0usize;
        for point in &series.points {
            let bucket = self.granularity.bucket_start(point.timestamp);
            if !self.range.covers_bucket(bucket, self.granularity) {
                discarded += 1;
                continue;
            }
            if values.contains_key(&bucket) {
                discarded += 1;
                continue;
            }
            values.insert(bucket, point.value);
        }

        if discarded > 0 {
            debug!("Discarded {} points for {} while bucketing", discarded, key);
        }

        self.series.insert(
            key,
            SeriesEntry {
                name: series.name,
                client_name: series.client_name,
                status: series.status,
                values,
            },
        );
    }

    /// Publish the dataset
    pub fn build(self) -> AggregatedDataset {
        AggregatedDataset {
            range: self.range,
            granularity: self.granularity,
            parameters: self.parameters,
            requested_series: self.requested_series,
            series: self.series,
            failed: self.failed,
        }
    }
}
