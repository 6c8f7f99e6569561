//! Trend comparison pass
//!
//! Splits the dataset range into equal consecutive periods, totals each
//! device's consumption per period and compares each period with the one
//! before it.

use serde::Serialize;
use std::fmt;

use crate::analysis::{
    format_number, format_optional, require_parameter, require_percentage, AnalysisPass,
    FindingsRow, MetricColumns,
};
use crate::config::ConfigError;
use crate::dataset::AggregatedDataset;
use crate::DateRange;

/// Trend pass settings
#[derive(Debug, Clone, PartialEq)]
pub struct TrendConfig {
    /// Parameter to compare
    pub parameter: String,
    /// Number of equal periods (at least 2)
    pub periods: usize,
    /// Percentage change above which a row is flagged
    pub threshold: f64,
}

impl TrendConfig {
    /// Two periods and a 10 % threshold for `parameter`
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            periods: 2,
            threshold: 10.0,
        }
    }

    /// Check the period count and threshold
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.periods < 2 {
            return Err(ConfigError::Invalid(format!(
                "trend analysis needs at least 2 periods, got {}",
                self.periods
            )));
        }
        require_percentage("trend threshold", self.threshold)
    }
}

/// Direction of change between two periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Change above the threshold
    Increasing,
    /// Change below the negative threshold
    Decreasing,
    /// Change within the threshold
    Stable,
    /// Previous period was zero, current is not
    NewUsage,
    /// Neither period has any reading
    NoData,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::NewUsage => "new_usage",
            TrendDirection::NoData => "no_data",
        };
        f.write_str(s)
    }
}

/// Comparison of two consecutive periods
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendMetrics {
    /// Earlier period total
    pub previous_total: f64,
    /// Later period total
    pub current_total: f64,
    /// `current - previous`
    pub difference: f64,
    /// `(current - previous) / previous * 100`; `None` when previous is zero
    pub percent_change: Option<f64>,
    /// Classified direction
    pub direction: TrendDirection,
}

impl MetricColumns for TrendMetrics {
    fn headers() -> &'static [&'static str] {
        &[
            "previous_total",
            "current_total",
            "difference",
            "percent_change",
            "direction",
        ]
    }

    fn values(&self) -> Vec<String> {
        vec![
            format_number(self.previous_total),
            format_number(self.current_total),
            format_number(self.difference),
            format_optional(self.percent_change),
            self.direction.to_string(),
        ]
    }
}

/// Period-over-period consumption comparison
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendPass;

impl AnalysisPass for TrendPass {
    type Config = TrendConfig;
    type Metrics = TrendMetrics;

    fn name(&self) -> &'static str {
        "trend"
    }

    fn analyze(
        &self,
        dataset: &AggregatedDataset,
        config: &TrendConfig,
    ) -> Result<Vec<FindingsRow<TrendMetrics>>, ConfigError> {
        config.validate()?;
        require_parameter(dataset, &config.parameter)?;

        let periods = dataset.range().split_equal(config.periods);
        // the first bucket may start before the range does
        let bounds: Vec<_> = periods
            .iter()
            .enumerate()
            .map(|(index, period)| {
                let start = if index == 0 {
                    dataset.range().first_bucket(dataset.granularity())
                } else {
                    period.start()
                };
                (start, period.end())
            })
            .collect();
        let mut rows = Vec::new();

        for view in dataset.devices_for_parameter(&config.parameter) {
            let entry = match view.entry {
                Some(entry) if view.has_data() => entry,
                _ => {
                    rows.push(FindingsRow::no_data(&view, dataset.range().to_string()));
                    continue;
                }
            };

            for (pair, bounds) in periods.windows(2).zip(bounds.windows(2)) {
                let (previous, current) = (&pair[0], &pair[1]);
                let ((prev_start, prev_end), (cur_start, cur_end)) = (bounds[0], bounds[1]);
                let has_data = entry.has_values_between(prev_start, prev_end)
                    || entry.has_values_between(cur_start, cur_end);
                let metrics = compare(
                    entry.sum_between(prev_start, prev_end),
                    entry.sum_between(cur_start, cur_end),
                    has_data,
                    config.threshold,
                );
                let reasons = reasons(&metrics, config.threshold);
                rows.push(FindingsRow::with_metrics(
                    &view,
                    period_label(previous, current),
                    metrics,
                    reasons,
                ));
            }
        }

        Ok(rows)
    }
}

/// Compare two period totals
pub fn compare(previous: f64, current: f64, has_data: bool, threshold: f64) -> TrendMetrics {
    let difference = current - previous;

    let (percent_change, direction) = if !has_data {
        (None, TrendDirection::NoData)
    } else if previous == 0.0 {
        if current == 0.0 {
            (Some(0.0), TrendDirection::Stable)
        } else {
            (None, TrendDirection::NewUsage)
        }
    } else {
        let pct = difference / previous * 100.0;
        let direction = if pct.abs() <= threshold {
            TrendDirection::Stable
        } else if pct > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };
        (Some(pct), direction)
    };

    TrendMetrics {
        previous_total: previous,
        current_total: current,
        difference,
        percent_change,
        direction,
    }
}

fn reasons(metrics: &TrendMetrics, threshold: f64) -> Vec<String> {
    let reason = match (metrics.direction, metrics.percent_change) {
        (TrendDirection::Increasing, Some(pct)) => {
            format!("increase of {pct:.1}% exceeds {threshold:.1}%")
        }
        (TrendDirection::Decreasing, Some(pct)) => {
            format!("decrease of {:.1}% exceeds {threshold:.1}%", pct.abs())
        }
        (TrendDirection::NewUsage, _) => "new usage".to_string(),
        (TrendDirection::NoData, _) => "no data in either period".to_string(),
        _ => return Vec::new(),
    };
    vec![reason]
}

fn period_label(previous: &DateRange, current: &DateRange) -> String {
    const FORMAT: &str = "%Y-%m-%dT%H:%M";
    format!(
        "{}..{} vs {}..{}",
        previous.start().format(FORMAT),
        previous.end().format(FORMAT),
        current.start().format(FORMAT),
        current.end().format(FORMAT)
    )
}
