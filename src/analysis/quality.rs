//! Data quality pass
//!
//! One row per device over the whole range: completeness against the bucket
//! grid, zero and negative reading ratios and the longest run of zeros.

use serde::Serialize;

use crate::analysis::{
    format_number, require_parameter, require_percentage, AnalysisPass, FindingsRow, MetricColumns,
};
use crate::config::ConfigError;
use crate::dataset::{AggregatedDataset, SeriesEntry};

/// Quality pass settings
#[derive(Debug, Clone, PartialEq)]
pub struct QualityConfig {
    /// Parameter to audit
    pub parameter: String,
    /// Minimum completeness in percent
    pub completeness_threshold: f64,
    /// Maximum share of zero readings in percent
    pub max_zero_ratio: f64,
    /// Maximum share of negative readings in percent
    pub max_negative_ratio: f64,
}

impl QualityConfig {
    /// Defaults for `parameter`
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            completeness_threshold: 90.0,
            max_zero_ratio: 10.0,
            max_negative_ratio: 0.0,
        }
    }

    /// Check thresholds are percentages
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_percentage("completeness_threshold", self.completeness_threshold)?;
        require_percentage("max_zero_ratio", self.max_zero_ratio)?;
        require_percentage("max_negative_ratio", self.max_negative_ratio)
    }
}

/// Quality metrics for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    /// Buckets expected over the range
    pub expected: usize,
    /// Buckets with a present reading
    pub present: usize,
    /// `present / expected` in percent
    pub completeness: f64,
    /// Readings equal to zero
    pub zero_count: usize,
    /// Zero readings as a share of present readings, in percent
    pub zero_ratio: f64,
    /// Readings below zero
    pub negative_count: usize,
    /// Negative readings as a share of present readings, in percent
    pub negative_ratio: f64,
    /// Longest run of consecutive zero buckets
    pub longest_zero_run: usize,
}

impl MetricColumns for QualityMetrics {
    fn headers() -> &'static [&'static str] {
        &[
            "expected",
            "present",
            "completeness_pct",
            "zero_count",
            "zero_pct",
            "negative_count",
            "negative_pct",
            "longest_zero_run",
        ]
    }

    fn values(&self) -> Vec<String> {
        vec![
            self.expected.to_string(),
            self.present.to_string(),
            format_number(self.completeness),
            self.zero_count.to_string(),
            format_number(self.zero_ratio),
            self.negative_count.to_string(),
            format_number(self.negative_ratio),
            self.longest_zero_run.to_string(),
        ]
    }
}

/// Completeness, zero and negative reading audit
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityPass;

impl AnalysisPass for QualityPass {
    type Config = QualityConfig;
    type Metrics = QualityMetrics;

    fn name(&self) -> &'static str {
        "quality"
    }

    fn analyze(
        &self,
        dataset: &AggregatedDataset,
        config: &QualityConfig,
    ) -> Result<Vec<FindingsRow<QualityMetrics>>, ConfigError> {
        config.validate()?;
        require_parameter(dataset, &config.parameter)?;

        let grid = dataset.grid();
        let period = dataset.range().to_string();

        let rows = dataset
            .devices_for_parameter(&config.parameter)
            .into_iter()
            .map(|view| match view.entry {
                Some(entry) if view.has_data() => {
                    let metrics = measure(entry, &grid);
                    let reasons = reasons(&metrics, config);
                    FindingsRow::with_metrics(&view, period.clone(), metrics, reasons)
                }
                _ => FindingsRow::no_data(&view, period.clone()),
            })
            .collect();

        Ok(rows)
    }
}

fn measure(entry: &SeriesEntry, grid: &[chrono::DateTime<chrono::Utc>]) -> QualityMetrics {
    let expected = grid.len();
    let mut present = 0;
    let mut zero_count = 0;
    let mut negative_count = 0;
    let mut current_zero_run = 0;
    let mut longest_zero_run = 0;

    for bucket in grid {
        match entry.values.get(bucket).copied().flatten() {
            Some(value) => {
                present += 1;
                if value < 0.0 {
                    negative_count += 1;
                }
                if value == 0.0 {
                    zero_count += 1;
                    current_zero_run += 1;
                    longest_zero_run = longest_zero_run.max(current_zero_run);
                } else {
                    current_zero_run = 0;
                }
            }
            None => current_zero_run = 0,
        }
    }

    QualityMetrics {
        expected,
        present,
        completeness: percent(present, expected),
        zero_count,
        zero_ratio: percent(zero_count, present),
        negative_count,
        negative_ratio: percent(negative_count, present),
        longest_zero_run,
    }
}

fn reasons(metrics: &QualityMetrics, config: &QualityConfig) -> Vec<String> {
    let mut reasons = Vec::new();
    if metrics.completeness < config.completeness_threshold {
        reasons.push("incomplete".to_string());
    }
    if metrics.zero_ratio > config.max_zero_ratio {
        reasons.push("high zero values".to_string());
    }
    if metrics.negative_ratio > config.max_negative_ratio {
        reasons.push("negative values".to_string());
    }
    reasons
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
