//! Integration tests for concurrent extraction
//!
//! A scripted `SeriesSource` controls per-device latency and outcome so the
//! coordinator can be checked for determinism, bounded concurrency and
//! partial-failure accounting.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use energy_data_extractor::coordinator::{
    CoordinatorSettings, ExtractionCoordinator, ExtractionOutcome, TIMEOUT_REASON,
};
use energy_data_extractor::dataset::DatasetRow;
use energy_data_extractor::fetcher::SeriesSource;
use energy_data_extractor::registry::ParameterRegistry;
use energy_data_extractor::shutdown::ShutdownCoordinator;
use energy_data_extractor::{
    DateRange, DeviceSpec, ExtractedSeries, ExtractionConfig, FetchStatus, Granularity,
    RawSeriesPoint,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Script {
    Ok,
    Partial,
    Fail,
}

/// Returns three hourly readings per device after a per-device delay
struct ScriptedSource {
    delays: HashMap<u64, Duration>,
    scripts: HashMap<u64, Script>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completion_order: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    fn new() -> Self {
        Self {
            delays: HashMap::new(),
            scripts: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completion_order: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, device_id: u64, delay: Duration) -> Self {
        self.delays.insert(device_id, delay);
        self
    }

    fn with_script(mut self, device_id: u64, script: Script) -> Self {
        self.scripts.insert(device_id, script);
        self
    }
}

#[async_trait]
impl SeriesSource for ScriptedSource {
    async fn fetch_series(
        &self,
        device: &DeviceSpec,
        range: &DateRange,
        _granularity: Granularity,
    ) -> ExtractedSeries {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&device.device_id)
            .copied()
            .unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completion_order.lock().unwrap().push(device.device_id);

        let script = self
            .scripts
            .get(&device.device_id)
            .cloned()
            .unwrap_or(Script::Ok);
        let status = match script {
            Script::Ok => FetchStatus::Ok,
            Script::Partial => FetchStatus::Partial("1 of 2 windows failed: HTTP 500".into()),
            Script::Fail => return ExtractedSeries::failed(device, "HTTP 404: not found"),
        };

        let points = (0..3)
            .map(|h| {
                RawSeriesPoint::new(
                    range.start() + ChronoDuration::hours(h),
                    Some(device.device_id as f64 * 10.0 + h as f64),
                )
            })
            .collect();

        ExtractedSeries {
            device_id: device.device_id,
            name: device.name.clone(),
            parameter: device.parameter.clone(),
            client_name: Some("Test Client".into()),
            points,
            status,
        }
    }
}

fn config(devices: u64) -> ExtractionConfig {
    let devices: Vec<String> = (1..=devices)
        .map(|id| format!(r#"{{"device_id": {id}, "name": "Meter {id}", "param": "EACTIVE"}}"#))
        .collect();
    let json = format!(
        r#"{{
            "api_keys": [{{"token": "t", "client_name": "Test Client"}}],
            "params": ["EACTIVE"],
            "request_type": "hourly",
            "start_date": "2024-01-01T00:00:00Z",
            "end_date": "2024-01-02T00:00:00Z",
            "devices": [{}]
        }}"#,
        devices.join(",")
    );
    let registry = ParameterRegistry::load_embedded().unwrap();
    ExtractionConfig::from_json_str(&json, &registry).unwrap()
}

fn settings(concurrency: usize) -> CoordinatorSettings {
    CoordinatorSettings {
        concurrency,
        ..CoordinatorSettings::default()
    }
}

async fn run(source: ScriptedSource, config: &ExtractionConfig, settings: CoordinatorSettings) -> ExtractionOutcome {
    ExtractionCoordinator::new(Arc::new(source), settings)
        .with_shutdown(ShutdownCoordinator::shared())
        .extract(config)
        .await
}

fn owned_rows(outcome: &ExtractionOutcome) -> Vec<String> {
    outcome
        .dataset
        .rows()
        .map(|row: DatasetRow<'_>| format!("{}|{}|{}|{:?}", row.device_id, row.parameter, row.timestamp, row.value))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_dataset_independent_of_pool_size() {
    let config = config(8);
    let mut results = Vec::new();

    for concurrency in [1, 5, 8] {
        // later devices finish first
        let mut source = ScriptedSource::new();
        for id in 1..=8u64 {
            source = source.with_delay(id, Duration::from_millis(100 - id * 10));
        }
        let outcome = run(source, &config, settings(concurrency)).await;
        results.push(owned_rows(&outcome));
    }

    assert_eq!(results[0].len(), 8 * 3);
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}

#[tokio::test(start_paused = true)]
async fn test_dataset_independent_of_completion_order() {
    let config = config(4);

    let forward = (1..=4u64).fold(ScriptedSource::new(), |s, id| {
        s.with_delay(id, Duration::from_millis(id * 10))
    });
    let reverse = (1..=4u64).fold(ScriptedSource::new(), |s, id| {
        s.with_delay(id, Duration::from_millis(50 - id * 10))
    });

    let (forward, reverse) = (Arc::new(forward), Arc::new(reverse));
    let forward_outcome = ExtractionCoordinator::new(forward.clone(), settings(4))
        .with_shutdown(ShutdownCoordinator::shared())
        .extract(&config)
        .await;
    let reverse_outcome = ExtractionCoordinator::new(reverse.clone(), settings(4))
        .with_shutdown(ShutdownCoordinator::shared())
        .extract(&config)
        .await;

    assert_eq!(*forward.completion_order.lock().unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(*reverse.completion_order.lock().unwrap(), vec![4, 3, 2, 1]);
    assert_eq!(forward_outcome.dataset, reverse_outcome.dataset);
    assert_eq!(forward_outcome.summary, reverse_outcome.summary);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let config = config(10);
    let source = Arc::new(ScriptedSource::new());
    let outcome = ExtractionCoordinator::new(source.clone(), settings(3))
        .with_shutdown(ShutdownCoordinator::shared())
        .extract(&config)
        .await;

    assert_eq!(outcome.summary.succeeded, 10);
    let max = source.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "max in flight was {max}");
    assert!(max >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failures_are_accounted() {
    let config = config(5);
    let source = ScriptedSource::new()
        .with_script(2, Script::Fail)
        .with_script(4, Script::Partial);
    let outcome = run(source, &config, settings(5)).await;
    let summary = &outcome.summary;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded + summary.partial.len() + summary.failed.len(), summary.total);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].device_id, 2);
    assert!(summary.failed[0].reason.contains("404"));
    assert_eq!(summary.partial[0].device_id, 4);
    assert!(summary.aggregate_failure.is_none());

    // failed devices contribute no rows
    assert_eq!(outcome.dataset.series_count(), 4);
    assert!(outcome.dataset.rows().all(|row| row.device_id != 2));
}

#[tokio::test(start_paused = true)]
async fn test_majority_failure_reports_aggregate_failure() {
    let config = config(4);
    let source = ScriptedSource::new()
        .with_script(1, Script::Fail)
        .with_script(2, Script::Fail)
        .with_script(3, Script::Fail);
    let outcome = run(source, &config, settings(2)).await;

    let failure = outcome.summary.aggregate_failure.expect("aggregate failure");
    assert_eq!(failure.failed, 3);
    assert_eq!(failure.total, 4);
    // the surviving device is still published
    assert_eq!(outcome.dataset.series_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_keeps_completed_and_times_out_the_rest() {
    let config = config(3);
    let source = ScriptedSource::new()
        .with_delay(1, Duration::from_millis(10))
        .with_delay(2, Duration::from_secs(30))
        .with_delay(3, Duration::from_secs(60));
    let settings = CoordinatorSettings {
        concurrency: 3,
        deadline: Some(Duration::from_secs(1)),
        ..CoordinatorSettings::default()
    };
    let outcome = run(source, &config, settings).await;

    assert_eq!(outcome.summary.succeeded, 1);
    assert_eq!(outcome.summary.failed.len(), 2);
    assert!(outcome
        .summary
        .failed
        .iter()
        .all(|device| device.reason == TIMEOUT_REASON));
    assert_eq!(outcome.dataset.series_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_callback_sees_every_device() {
    let config = config(6);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();

    let outcome = ExtractionCoordinator::new(Arc::new(ScriptedSource::new()), settings(2))
        .with_shutdown(ShutdownCoordinator::shared())
        .with_progress(Arc::new(move |_series: &ExtractedSeries| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .extract(&config)
        .await;

    assert_eq!(seen.load(Ordering::SeqCst), 6);
    assert!(outcome.summary.is_complete());
}
