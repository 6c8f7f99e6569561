//! Tabular output writers for datasets and findings

use crate::analysis::{FindingsRow, MetricColumns};
use crate::dataset::AggregatedDataset;

pub mod csv;

pub use self::csv::{CsvDatasetWriter, CsvFindingsWriter};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Generic output writer
pub trait OutputWriter {
    /// Flush any buffered data to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Close the writer and finalize output
    fn close(self) -> OutputResult<()>;
}

/// Writes the flattened dataset
pub trait DatasetWriter: OutputWriter {
    /// Write every row of `dataset`, returning the number of rows written
    fn write_dataset(&mut self, dataset: &AggregatedDataset) -> OutputResult<u64>;
}

/// Writes a findings table
pub trait FindingsWriter<M: MetricColumns>: OutputWriter {
    /// Write a single findings row
    fn write_row(&mut self, row: &FindingsRow<M>) -> OutputResult<()>;

    /// Write multiple rows at once
    fn write_rows(&mut self, rows: &[FindingsRow<M>]) -> OutputResult<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }
}
