//! Unit tests for findings CSV layout

use chrono::{Duration, TimeZone, Utc};
use energy_data_extractor::analysis::{
    AnalysisPass, MetricColumns, OutOfHoursConfig, OutOfHoursMetrics, OutOfHoursPass, TrendConfig,
    TrendMetrics, TrendPass,
};
use energy_data_extractor::dataset::{AggregatedDataset, DatasetBuilder};
use energy_data_extractor::output::{CsvFindingsWriter, FindingsWriter, OutputWriter};
use energy_data_extractor::{
    DateRange, DeviceSpec, ExtractedSeries, FetchStatus, Granularity, RawSeriesPoint,
};
use tempfile::tempdir;

fn dataset() -> AggregatedDataset {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let range = DateRange::new(start, start + Duration::days(2)).unwrap();
    let mut builder = DatasetBuilder::new(range, Granularity::Hourly, ["EACTIVE".to_string()].into(), 2);

    let points = vec![
        RawSeriesPoint::new(start + Duration::hours(10), Some(100.0)),
        RawSeriesPoint::new(start + Duration::hours(34), Some(150.0)),
    ];
    builder.insert(ExtractedSeries {
        device_id: 1,
        name: "Office".into(),
        parameter: "EACTIVE".into(),
        client_name: None,
        points,
        status: FetchStatus::Ok,
    });

    let failed = DeviceSpec {
        device_id: 2,
        name: "Warehouse".into(),
        parameter: "EACTIVE".into(),
    };
    builder.insert(ExtractedSeries::failed(&failed, "timeout"));
    builder.build()
}

fn read(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (headers, rows)
}

#[test]
fn test_trend_findings_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trend_findings.csv");
    let rows = TrendPass.analyze(&dataset(), &TrendConfig::new("EACTIVE")).unwrap();

    let mut writer = CsvFindingsWriter::<TrendMetrics>::new(&path).unwrap();
    writer.write_rows(&rows).unwrap();
    writer.close().unwrap();

    let (headers, records) = read(&path);
    assert_eq!(headers.len(), 6 + TrendMetrics::headers().len());
    assert_eq!(&headers[..4], ["device_id", "device_name", "param_key", "period"]);
    assert_eq!(&headers[headers.len() - 2..], ["flagged", "reason"]);

    assert_eq!(records.len(), 2);
    let office = &records[0];
    assert_eq!(office[4], "100.00");
    assert_eq!(office[5], "150.00");
    assert_eq!(office[7], "50.00");
    assert_eq!(office[8], "increasing");
    assert_eq!(office[9], "true");

    // failed device: metric cells empty, reason carries the fetch failure
    let warehouse = &records[1];
    assert_eq!(warehouse[0], "2");
    assert!(warehouse[4..9].iter().all(String::is_empty));
    assert_eq!(warehouse[9], "true");
    assert_eq!(warehouse[10], "no data available (fetch failed: timeout)");
}

#[test]
fn test_out_of_hours_findings_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out_of_hours_findings.csv");
    let rows = OutOfHoursPass
        .analyze(&dataset(), &OutOfHoursConfig::new("EACTIVE"))
        .unwrap();

    let mut writer = CsvFindingsWriter::<OutOfHoursMetrics>::new(&path).unwrap();
    writer.write_rows(&rows).unwrap();
    assert_eq!(writer.rows_written(), 3);
    writer.close().unwrap();

    let (headers, records) = read(&path);
    assert!(headers.contains(&"out_of_hours_pct".to_string()));
    assert_eq!(records[0][3], "2024-05-01");
    assert_eq!(records[1][3], "2024-05-02");
    assert_eq!(records[0][7], "0.00");
    assert_eq!(records[0][8], "false");
}
