//! Prometheus metrics for extraction runs
//!
//! The `metrics` macros are no-ops until a recorder is installed, so
//! library users that never call [`init_metrics`] record nothing.
//! With `--metrics-addr` the CLI installs an exporter that serves
//! `/metrics` for the lifetime of the run.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::FetchStatus;

/// Metric names exported by the extractor
pub mod names {
    /// API requests by endpoint and status
    pub const REQUESTS: &str = "energy_api_requests_total";
    /// API responses with status 429
    pub const THROTTLED: &str = "energy_api_throttled_total";
    /// Retries scheduled, by attempt number
    pub const RETRIES: &str = "energy_api_retries_total";
    /// Latency of a single API attempt
    pub const REQUEST_SECONDS: &str = "energy_api_request_duration_seconds";
    /// Sleep before a retry
    pub const BACKOFF_SECONDS: &str = "energy_api_backoff_duration_seconds";
    /// Series outcomes by fetch status
    pub const SERIES: &str = "energy_series_fetched_total";
    /// Wall-clock time of a full extraction
    pub const EXTRACTION_SECONDS: &str = "energy_extraction_duration_seconds";
}

const COUNTERS: [(&str, &str); 4] = [
    (names::REQUESTS, "Requests sent to the metering API"),
    (names::THROTTLED, "Responses with status 429"),
    (names::RETRIES, "Retries scheduled after a failed attempt"),
    (names::SERIES, "Series fetched, by outcome"),
];

const HISTOGRAMS: [(&str, &str); 3] = [
    (names::REQUEST_SECONDS, "Duration of one metering API attempt"),
    (names::BACKOFF_SECONDS, "Backoff slept before a retry"),
    (names::EXTRACTION_SECONDS, "Duration of a full extraction run"),
];

static EXPORTER_INSTALLED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Install the Prometheus exporter on `addr`
///
/// Calling this again after a successful install does nothing.
///
/// # Errors
/// Returns [`MetricsError::InstallError`] when the listener cannot bind or
/// another recorder is already installed.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut installed = EXPORTER_INSTALLED.lock().await;
    if *installed {
        debug!(%addr, "Prometheus exporter already installed");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::InstallError(e.to_string()))?;

    for (name, help) in COUNTERS {
        describe_counter!(name, Unit::Count, help);
    }
    for (name, help) in HISTOGRAMS {
        describe_histogram!(name, Unit::Seconds, help);
    }

    *installed = true;
    info!(%addr, "Serving Prometheus metrics");
    Ok(())
}

/// Whether [`init_metrics`] has installed the exporter
pub async fn is_initialized() -> bool {
    *EXPORTER_INSTALLED.lock().await
}

/// Metrics errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter installation failed
    #[error("failed to install Prometheus exporter: {0}")]
    InstallError(String),
}

/// Process-unique id attached to request log lines
pub fn generate_correlation_id() -> String {
    let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    format!("req-{id:08x}")
}

/// Times one API attempt and records its outcome when finished
#[derive(Debug)]
pub struct RequestTimer {
    endpoint: String,
    attempt: u32,
    correlation_id: String,
    started: Instant,
}

impl RequestTimer {
    /// Start timing `attempt` (1-based) against `endpoint`
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let timer = Self {
            endpoint: endpoint.into(),
            attempt,
            correlation_id: generate_correlation_id(),
            started: Instant::now(),
        };
        debug!(
            correlation_id = %timer.correlation_id,
            endpoint = %timer.endpoint,
            attempt,
            "API request sent"
        );
        timer
    }

    /// Correlation id of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The server answered with `status`
    pub fn finish_status(self, status: u16) {
        if status == 429 {
            counter!(names::THROTTLED, "endpoint" => self.endpoint.clone()).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                attempt = self.attempt,
                "Metering API throttled the request"
            );
        }
        self.finish(status.to_string());
    }

    /// The attempt failed before a status arrived
    pub fn finish_transport_error(self) {
        self.finish("network_error".to_string());
    }

    fn finish(self, status: String) {
        let elapsed = self.started.elapsed();
        histogram!(names::REQUEST_SECONDS, "endpoint" => self.endpoint.clone())
            .record(elapsed.as_secs_f64());
        debug!(
            correlation_id = %self.correlation_id,
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "API request finished"
        );
        counter!(names::REQUESTS, "endpoint" => self.endpoint, "status" => status).increment(1);
    }
}

/// Count a retry and the backoff slept before it
pub fn record_retry_backoff(delay: Duration, attempt: u32) {
    counter!(names::RETRIES, "attempt" => attempt.to_string()).increment(1);
    histogram!(names::BACKOFF_SECONDS).record(delay.as_secs_f64());
}

/// Count one series outcome
pub fn record_series_outcome(status: &FetchStatus) {
    counter!(names::SERIES, "status" => status.label()).increment(1);
}

/// Record how long a full extraction took
pub fn record_extraction_duration(elapsed: Duration) {
    histogram!(names::EXTRACTION_SECONDS).record(elapsed.as_secs_f64());
}
