//! Bounded concurrent extraction

use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::coordinator::summary::ExtractionSummary;
use crate::dataset::{AggregatedDataset, DatasetBuilder};
use crate::fetcher::SeriesSource;
use crate::metrics::{record_extraction_duration, record_series_outcome};
use crate::shutdown::{self, SharedShutdown};
use crate::ExtractedSeries;

/// Default number of in-flight fetches
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default failed fraction that triggers an aggregate failure report
pub const DEFAULT_FAILURE_THRESHOLD: f64 = 0.5;

/// Reason given to fetches abandoned at the deadline
pub const TIMEOUT_REASON: &str = "timeout";

/// Reason given to fetches abandoned on shutdown
pub const CANCELLED_REASON: &str = "cancelled";

/// Called once per finished series, in completion order
pub type ProgressCallback = Arc<dyn Fn(&ExtractedSeries) + Send + Sync>;

/// Coordinator tuning knobs
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// Maximum in-flight fetches (values below 1 are treated as 1)
    pub concurrency: usize,
    /// Overall deadline for the run
    pub deadline: Option<Duration>,
    /// Failed fraction above which an aggregate failure is reported
    pub failure_threshold: f64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            deadline: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Result of one extraction run
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Published dataset
    pub dataset: AggregatedDataset,
    /// Success / partial / failure summary
    pub summary: ExtractionSummary,
    /// Wall-clock duration
    pub elapsed: Duration,
}

/// Fans out series fetches over a bounded pool and merges the results
pub struct ExtractionCoordinator {
    source: Arc<dyn SeriesSource>,
    settings: CoordinatorSettings,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressCallback>,
}

impl ExtractionCoordinator {
    /// Create a coordinator; picks up the global shutdown handle if one is set
    pub fn new(source: Arc<dyn SeriesSource>, settings: CoordinatorSettings) -> Self {
        Self {
            source,
            settings,
            shutdown: shutdown::get_global_shutdown(),
            progress: None,
        }
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Report each finished series to `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Settings in use
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Run the extraction
    ///
    /// Never fails: device failures, the deadline and shutdown all end up
    /// in the summary. Fetches still in flight when the deadline passes or
    /// shutdown is requested are abandoned and reported as failed with
    /// reason `timeout` or `cancelled`; completed results are kept.
    pub async fn extract(&self, config: &ExtractionConfig) -> ExtractionOutcome {
        let started = Instant::now();
        let devices = config.devices();
        let range = config.date_range();
        let granularity = config.granularity();
        let concurrency = self.settings.concurrency.max(1);
        let deadline = self.settings.deadline.map(|d| started + d);

        info!(
            devices = devices.len(),
            concurrency = concurrency,
            range = %range,
            granularity = %granularity,
            "Starting extraction"
        );

        let mut finished: BTreeMap<usize, ExtractedSeries> = BTreeMap::new();
        let mut pending = stream::iter(devices.iter().enumerate())
            .map(|(index, device)| {
                let source = self.source.clone();
                async move {
                    let series = source.fetch_series(device, &range, granularity).await;
                    (index, series)
                }
            })
            .buffer_unordered(concurrency);

        let interrupted = loop {
            tokio::select! {
                biased;
                _ = wait_for_deadline(deadline) => break Some(TIMEOUT_REASON),
                _ = wait_for_shutdown(self.shutdown.as_ref()) => break Some(CANCELLED_REASON),
                next = pending.next() => match next {
                    Some((index, series)) => {
                        debug!(
                            "Series {} finished with status {}",
                            series.key(),
                            series.status.label()
                        );
                        if let Some(progress) = &self.progress {
                            progress(&series);
                        }
                        finished.insert(index, series);
                    }
                    None => break None,
                },
            }
        };
        drop(pending);

        if let Some(reason) = interrupted {
            let abandoned = devices.len() - finished.len();
            warn!(
                "Extraction interrupted ({}): abandoning {} in-flight or queued fetches",
                reason, abandoned
            );
            for (index, device) in devices.iter().enumerate() {
                finished
                    .entry(index)
                    .or_insert_with(|| ExtractedSeries::failed(device, reason));
            }
        }

        for series in finished.values() {
            record_series_outcome(&series.status);
        }

        let summary = ExtractionSummary::from_series(finished.values(), self.settings.failure_threshold);
        let mut builder = DatasetBuilder::new(
            range,
            granularity,
            config.parameters().clone(),
            devices.len(),
        );
        for series in finished.into_values() {
            builder.insert(series);
        }
        let dataset = builder.build();

        let elapsed = started.elapsed();
        record_extraction_duration(elapsed);

        info!(
            succeeded = summary.succeeded,
            partial = summary.partial.len(),
            failed = summary.failed.len(),
            records = dataset.record_count(),
            elapsed_ms = elapsed.as_millis(),
            "Extraction finished"
        );
        if let Some(failure) = &summary.aggregate_failure {
            warn!("Aggregate failure: {}", failure);
        }

        ExtractionOutcome {
            dataset,
            summary,
            elapsed,
        }
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_shutdown(shutdown: Option<&SharedShutdown>) {
    match shutdown {
        Some(handle) => handle.wait_for_shutdown().await,
        None => std::future::pending().await,
    }
}
