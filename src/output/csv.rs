//! CSV output writer implementation

use chrono::SecondsFormat;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, info};

use super::{DatasetWriter, FindingsWriter, OutputError, OutputResult, OutputWriter};
use crate::analysis::{FindingsRow, MetricColumns};
use crate::dataset::{AggregatedDataset, DatasetRow};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Flush every N rows
const FLUSH_INTERVAL: u64 = 1_000;

/// CSV record for one dataset row
#[derive(Debug, Serialize)]
struct DatasetRecord<'a> {
    client_name: &'a str,
    device_id: u64,
    device_name: &'a str,
    param_key: &'a str,
    timestamp: String,
    value: Option<f64>,
}

impl<'a> From<&DatasetRow<'a>> for DatasetRecord<'a> {
    fn from(row: &DatasetRow<'a>) -> Self {
        Self {
            client_name: row.client_name.unwrap_or_default(),
            device_id: row.device_id,
            device_name: row.device_name,
            param_key: row.parameter,
            timestamp: row.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            value: row.value,
        }
    }
}

fn open_csv(path: &Path, buffer_size: usize) -> OutputResult<Writer<BufWriter<File>>> {
    info!("Creating CSV writer: path={}", path.display());

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
        }
    }

    let file = File::create(path)
        .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))?;

    Ok(Writer::from_writer(BufWriter::with_capacity(buffer_size, file)))
}

fn finish(mut writer: Writer<BufWriter<File>>) -> OutputResult<()> {
    writer
        .flush()
        .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))?;

    let buf_writer = writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {e}")))?;

    let file = buf_writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;

    file.sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))
}

/// CSV writer for the flattened dataset
///
/// Columns: `client_name, device_id, device_name, param_key, timestamp, value`.
/// Absent values are written as empty cells.
pub struct CsvDatasetWriter {
    writer: Writer<BufWriter<File>>,
    rows_written: u64,
}

impl CsvDatasetWriter {
    /// Create a new dataset writer
    ///
    /// # Arguments
    /// * `path` - Output file path; parent directories are created
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        Ok(Self {
            writer: open_csv(path.as_ref(), DEFAULT_BUFFER_SIZE)?,
            rows_written: 0,
        })
    }

    /// Rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl DatasetWriter for CsvDatasetWriter {
    fn write_dataset(&mut self, dataset: &AggregatedDataset) -> OutputResult<u64> {
        let before = self.rows_written;
        for row in dataset.rows() {
            self.writer
                .serialize(DatasetRecord::from(&row))
                .map_err(|e| OutputError::CsvError(format!("Failed to write row: {e}")))?;
            self.rows_written += 1;

            if self.rows_written % FLUSH_INTERVAL == 0 {
                self.flush()?;
                debug!("Progress: {} rows written", self.rows_written);
            }
        }
        Ok(self.rows_written - before)
    }
}

impl OutputWriter for CsvDatasetWriter {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))
    }

    fn close(self) -> OutputResult<()> {
        debug!("Closing CSV writer: {} total rows written", self.rows_written);
        finish(self.writer)?;
        info!("Dataset CSV closed: {} rows written", self.rows_written);
        Ok(())
    }
}

/// Common columns preceding the metric columns
const FINDINGS_LEADING_COLUMNS: [&str; 4] = ["device_id", "device_name", "param_key", "period"];

/// Common columns following the metric columns
const FINDINGS_TRAILING_COLUMNS: [&str; 2] = ["flagged", "reason"];

/// CSV writer for a findings table with pass-specific metric columns
pub struct CsvFindingsWriter<M: MetricColumns> {
    writer: Writer<BufWriter<File>>,
    rows_written: u64,
    _metrics: PhantomData<M>,
}

impl<M: MetricColumns> CsvFindingsWriter<M> {
    /// Create a findings writer and write the header row
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let mut writer = open_csv(path.as_ref(), DEFAULT_BUFFER_SIZE)?;
        let header: Vec<&str> = FINDINGS_LEADING_COLUMNS
            .iter()
            .chain(M::headers())
            .chain(FINDINGS_TRAILING_COLUMNS.iter())
            .copied()
            .collect();
        writer
            .write_record(&header)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {e}")))?;

        Ok(Self {
            writer,
            rows_written: 0,
            _metrics: PhantomData,
        })
    }

    /// Rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl<M: MetricColumns> FindingsWriter<M> for CsvFindingsWriter<M> {
    fn write_row(&mut self, row: &FindingsRow<M>) -> OutputResult<()> {
        let metrics = match &row.metrics {
            Some(metrics) => metrics.values(),
            None => vec![String::new(); M::headers().len()],
        };

        let mut record = Vec::with_capacity(FINDINGS_LEADING_COLUMNS.len() + metrics.len() + 2);
        record.push(row.device_id.to_string());
        record.push(row.name.clone());
        record.push(row.parameter.clone());
        record.push(row.period.clone());
        record.extend(metrics);
        record.push(row.flagged.to_string());
        record.push(row.reason.clone());

        self.writer
            .write_record(&record)
            .map_err(|e| OutputError::CsvError(format!("Failed to write findings row: {e}")))?;
        self.rows_written += 1;
        Ok(())
    }
}

impl<M: MetricColumns> OutputWriter for CsvFindingsWriter<M> {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))
    }

    fn close(self) -> OutputResult<()> {
        finish(self.writer)?;
        info!("Findings CSV closed: {} rows written", self.rows_written);
        Ok(())
    }
}
