//! End-to-end pipeline: fetch over a scripted transport, aggregate, analyse, write

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use energy_data_extractor::analysis::{
    AnalysisPass, OutOfHoursConfig, OutOfHoursMetrics, OutOfHoursPass, QualityConfig,
    QualityMetrics, QualityPass, TrendConfig, TrendDirection, TrendPass,
};
use energy_data_extractor::coordinator::{CoordinatorSettings, ExtractionCoordinator, RateLimiter};
use energy_data_extractor::fetcher::{
    ApiRequest, HttpClientSettings, HttpResponse, HttpTransport, MeteringHttpClient, NetworkError,
    RetryPolicy, SeriesFetcher,
};
use energy_data_extractor::output::{
    CsvDatasetWriter, CsvFindingsWriter, DatasetWriter, FindingsWriter, OutputWriter,
};
use energy_data_extractor::registry::ParameterRegistry;
use energy_data_extractor::shutdown::ShutdownCoordinator;
use energy_data_extractor::ExtractionConfig;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Serves hourly readings per device:
/// - device 1: 10 inside 07-19, 2 outside
/// - device 2: always 404
/// - device 3: 10 inside 07-19, 0 outside
struct MeterFarm;

#[async_trait]
impl HttpTransport for MeterFarm {
    async fn execute(&self, _url: &str, request: &ApiRequest) -> Result<HttpResponse, NetworkError> {
        let device = request.query_value("device_id").unwrap_or_default();
        if device == "2" {
            return Ok(HttpResponse::new(404, "device not found"));
        }
        let night = if device == "3" { 0.0 } else { 2.0 };

        let parse = |key: &str| {
            DateTime::parse_from_rfc3339(request.query_value(key).unwrap_or_default())
                .map(|dt| dt.with_timezone(&Utc))
        };
        let (Ok(from), Ok(to)) = (parse("from"), parse("to")) else {
            return Ok(HttpResponse::new(400, "bad range"));
        };

        let mut values = Vec::new();
        let mut ts = from;
        while ts <= to {
            let v = if (7..19).contains(&ts.hour()) { 10.0 } else { night };
            values.push(format!(
                r#"{{"ts":"{}","v":{v}}}"#,
                ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ));
            ts += ChronoDuration::hours(1);
        }
        Ok(HttpResponse::new(200, format!(r#"{{"values":[{}]}}"#, values.join(","))))
    }
}

const CONFIG: &str = r#"{
    "api_keys": [{"token": "abc", "client_name": "ILIM"}],
    "params": ["EACTIVE"],
    "request_type": "hourly",
    "start_date": "2024-03-04",
    "end_date": "2024-03-06",
    "devices": [
        {"device_id": 1, "name": "Main", "param": "EACTIVE"},
        {"device_id": 2, "name": "Annex", "param": "EACTIVE"},
        {"device_id": 3, "name": "Lighting", "param": "EACTIVE"}
    ]
}"#;

async fn extract() -> energy_data_extractor::coordinator::ExtractionOutcome {
    let registry = Arc::new(ParameterRegistry::load_embedded().unwrap());
    let config = ExtractionConfig::from_json_str(CONFIG, &registry).unwrap();

    let settings = HttpClientSettings {
        base_url: "http://metering.test".into(),
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy::with_max_retries(1).without_jitter(),
    };
    let client = MeteringHttpClient::new(Arc::new(MeterFarm), settings, Arc::new(RateLimiter::default()));
    let fetcher = SeriesFetcher::new(client, registry, config.api_keys().to_vec());

    ExtractionCoordinator::new(Arc::new(fetcher), CoordinatorSettings::default())
        .with_shutdown(ShutdownCoordinator::shared())
        .extract(&config)
        .await
}

#[tokio::test(start_paused = true)]
async fn test_extraction_summary_and_dataset() {
    let outcome = extract().await;

    assert_eq!(outcome.summary.total, 3);
    assert_eq!(outcome.summary.succeeded, 2);
    assert_eq!(outcome.summary.failed.len(), 1);
    assert_eq!(outcome.summary.failed[0].device_id, 2);
    assert!(outcome.summary.aggregate_failure.is_none());

    // two full days of hourly buckets for two devices
    assert_eq!(outcome.dataset.record_count(), 2 * 48);
    let summary = outcome.dataset.summary();
    assert_eq!(summary.devices, 2);
    assert_eq!(summary.requested_devices, 3);
    assert!(outcome
        .dataset
        .rows()
        .all(|row| row.client_name == Some("ILIM")));
}

#[tokio::test(start_paused = true)]
async fn test_analysis_passes_over_extracted_data() {
    let outcome = extract().await;
    let dataset = &outcome.dataset;

    let quality = QualityPass
        .analyze(dataset, &QualityConfig::new("EACTIVE"))
        .unwrap();
    assert_eq!(quality.len(), 3);
    assert!(!quality[0].flagged);
    assert!(quality[1].flagged);
    assert!(quality[1].reason.starts_with("no data available (fetch failed:"));
    assert_eq!(quality[2].reason, "high zero values");

    let trend = TrendPass.analyze(dataset, &TrendConfig::new("EACTIVE")).unwrap();
    let main = trend[0].metrics.as_ref().unwrap();
    assert_eq!(main.direction, TrendDirection::Stable);
    assert_eq!(main.previous_total, main.current_total);

    let out_of_hours = OutOfHoursPass
        .analyze(dataset, &OutOfHoursConfig::new("EACTIVE"))
        .unwrap();
    let main_days: Vec<_> = out_of_hours.iter().filter(|r| r.device_id == 1).collect();
    assert_eq!(main_days.len(), 2);
    let metrics: &OutOfHoursMetrics = main_days[0].metrics.as_ref().unwrap();
    assert_eq!(metrics.working_total, 120.0);
    assert_eq!(metrics.out_of_hours_total, 24.0);
    assert!(main_days.iter().all(|r| !r.flagged));
}

#[tokio::test(start_paused = true)]
async fn test_outputs_written_to_disk() {
    let outcome = extract().await;
    let dir = tempdir().unwrap();

    let dataset_path = dir.path().join("dataset.csv");
    let mut writer = CsvDatasetWriter::new(&dataset_path).unwrap();
    assert_eq!(writer.write_dataset(&outcome.dataset).unwrap(), 96);
    writer.close().unwrap();

    let findings_path = dir.path().join("quality_findings.csv");
    let rows = QualityPass
        .analyze(&outcome.dataset, &QualityConfig::new("EACTIVE"))
        .unwrap();
    let mut findings = CsvFindingsWriter::<QualityMetrics>::new(&findings_path).unwrap();
    findings.write_rows(&rows).unwrap();
    findings.close().unwrap();

    let dataset_lines = std::fs::read_to_string(&dataset_path).unwrap().lines().count();
    assert_eq!(dataset_lines, 97);

    let mut reader = csv::Reader::from_path(&findings_path).unwrap();
    let records: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(&records[1][0], "2");
}
