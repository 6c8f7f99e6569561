//! Out-of-hours consumption pass
//!
//! Each local day is split into working hours `[start_hour, end_hour)` and the
//! remaining hours. The out-of-hours share is measured against the day's total
//! consumption.

use chrono::{FixedOffset, NaiveDate, Offset, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::analysis::{
    format_number, format_optional, require_parameter, require_percentage, AnalysisPass,
    FindingsRow, MetricColumns,
};
use crate::config::ConfigError;
use crate::dataset::{AggregatedDataset, SeriesEntry};
use crate::Granularity;

/// Out-of-hours pass settings
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfHoursConfig {
    /// Parameter to analyse
    pub parameter: String,
    /// First working hour (inclusive)
    pub working_start_hour: u32,
    /// End of working hours (exclusive)
    pub working_end_hour: u32,
    /// Out-of-hours share of the daily total above which a day is flagged, in percent
    pub threshold: f64,
    /// Offset used to derive local days and hours
    pub utc_offset: FixedOffset,
    /// Also flag days where out-of-hours consumption exceeds working-hours consumption
    pub flag_when_exceeds_working: bool,
}

impl OutOfHoursConfig {
    /// Working hours 07-19 UTC and a 30 % threshold for `parameter`
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            working_start_hour: 7,
            working_end_hour: 19,
            threshold: 30.0,
            utc_offset: Utc.fix(),
            flag_when_exceeds_working: true,
        }
    }

    /// Check working hours and threshold
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.working_start_hour >= self.working_end_hour || self.working_end_hour > 24 {
            return Err(ConfigError::Invalid(format!(
                "working hours must satisfy start < end <= 24, got [{}, {})",
                self.working_start_hour, self.working_end_hour
            )));
        }
        require_percentage("out-of-hours threshold", self.threshold)
    }

    fn is_working_hour(&self, hour: u32) -> bool {
        hour >= self.working_start_hour && hour < self.working_end_hour
    }
}

/// Daily split of consumption
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutOfHoursMetrics {
    /// Consumption inside working hours
    pub working_total: f64,
    /// Consumption outside working hours
    pub out_of_hours_total: f64,
    /// Daily total
    pub total: f64,
    /// Out-of-hours share of the total in percent; `None` when the total is zero
    pub out_of_hours_percent: Option<f64>,
}

impl MetricColumns for OutOfHoursMetrics {
    fn headers() -> &'static [&'static str] {
        &["working_total", "out_of_hours_total", "total", "out_of_hours_pct"]
    }

    fn values(&self) -> Vec<String> {
        vec![
            format_number(self.working_total),
            format_number(self.out_of_hours_total),
            format_number(self.total),
            format_optional(self.out_of_hours_percent),
        ]
    }
}

/// Per-day out-of-hours consumption check
#[derive(Debug, Clone, Copy, Default)]
pub struct OutOfHoursPass;

impl AnalysisPass for OutOfHoursPass {
    type Config = OutOfHoursConfig;
    type Metrics = OutOfHoursMetrics;

    fn name(&self) -> &'static str {
        "out_of_hours"
    }

    fn analyze(
        &self,
        dataset: &AggregatedDataset,
        config: &OutOfHoursConfig,
    ) -> Result<Vec<FindingsRow<OutOfHoursMetrics>>, ConfigError> {
        config.validate()?;
        require_parameter(dataset, &config.parameter)?;
        if dataset.granularity() != Granularity::Hourly {
            return Err(ConfigError::Invalid(format!(
                "out-of-hours analysis needs hourly data, dataset is {}",
                dataset.granularity()
            )));
        }

        let mut rows = Vec::new();
        for view in dataset.devices_for_parameter(&config.parameter) {
            let entry = match view.entry {
                Some(entry) if view.has_data() => entry,
                _ => {
                    rows.push(FindingsRow::no_data(&view, dataset.range().to_string()));
                    continue;
                }
            };

            for (day, metrics) in daily_split(entry, config) {
                let reasons = reasons(&metrics, config);
                rows.push(FindingsRow::with_metrics(
                    &view,
                    day.format("%Y-%m-%d").to_string(),
                    metrics,
                    reasons,
                ));
            }
        }

        Ok(rows)
    }
}

fn daily_split(entry: &SeriesEntry, config: &OutOfHoursConfig) -> BTreeMap<NaiveDate, OutOfHoursMetrics> {
    let mut days: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();

    for (ts, value) in entry.present_values() {
        let local = ts.with_timezone(&config.utc_offset);
        let totals = days.entry(local.date_naive()).or_insert((0.0, 0.0));
        if config.is_working_hour(local.hour()) {
            totals.0 += value;
        } else {
            totals.1 += value;
        }
    }

    days.into_iter()
        .map(|(day, (working_total, out_of_hours_total))| {
            let total = working_total + out_of_hours_total;
            let out_of_hours_percent = (total != 0.0).then(|| out_of_hours_total / total * 100.0);
            (
                day,
                OutOfHoursMetrics {
                    working_total,
                    out_of_hours_total,
                    total,
                    out_of_hours_percent,
                },
            )
        })
        .collect()
}

fn reasons(metrics: &OutOfHoursMetrics, config: &OutOfHoursConfig) -> Vec<String> {
    let Some(pct) = metrics.out_of_hours_percent else {
        return Vec::new();
    };

    let mut reasons = Vec::new();
    if pct > config.threshold {
        reasons.push(format!(
            "out-of-hours consumption {pct:.1}% of daily total exceeds {:.1}%",
            config.threshold
        ));
    }
    if config.flag_when_exceeds_working && metrics.out_of_hours_total > metrics.working_total {
        reasons.push("out-of-hours consumption exceeds working hours".to_string());
    }
    reasons
}
