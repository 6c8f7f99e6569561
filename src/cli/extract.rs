//! Extract command implementation

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{parse_percentage, parse_utc_offset, Cli, CliError, OutputFormat};
use crate::analysis::{
    AnalysisPass, OutOfHoursConfig, OutOfHoursPass, QualityConfig, QualityPass,
    TrendConfig, TrendPass,
};
use crate::coordinator::{ExtractionCoordinator, ExtractionOutcome, ProgressCallback, RateLimiter};
use crate::dataset::AggregatedDataset;
use crate::fetcher::SeriesFetcher;
use crate::output::{CsvDatasetWriter, CsvFindingsWriter, DatasetWriter, FindingsWriter, OutputWriter};
use crate::registry::ParameterRegistry;
use crate::shutdown::SharedShutdown;
use crate::{ExtractedSeries, ExtractionConfig, Granularity};

/// Parameter analysed when `--analysis-param` is not given and the config requests it
const DEFAULT_ANALYSIS_PARAMETER: &str = "EACTIVE";

/// Arguments for the extract command
#[derive(Parser, Debug)]
pub struct ExtractArgs {
    /// Extraction config file (JSON)
    pub config: PathBuf,

    /// Directory for the dataset and findings CSV files
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Parameter the analyses run on (default: EACTIVE if requested, else the first parameter)
    #[arg(long)]
    pub analysis_param: Option<String>,

    /// Write the dataset only
    #[arg(long, default_value_t = false)]
    pub skip_analysis: bool,

    /// Minimum completeness in percent before a device is flagged
    #[arg(long, default_value = "90", value_parser = parse_percentage)]
    pub completeness_threshold: f64,

    /// Maximum share of zero readings in percent
    #[arg(long, default_value = "10", value_parser = parse_percentage)]
    pub max_zero_ratio: f64,

    /// Maximum share of negative readings in percent
    #[arg(long, default_value = "0", value_parser = parse_percentage)]
    pub max_negative_ratio: f64,

    /// Number of equal periods compared by the trend analysis
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u32).range(2..=366))]
    pub trend_periods: u32,

    /// Percentage change above which a trend is flagged
    #[arg(long, default_value = "10", value_parser = parse_percentage)]
    pub trend_threshold: f64,

    /// First working hour (inclusive)
    #[arg(long, default_value = "7", value_parser = clap::value_parser!(u32).range(0..=23))]
    pub working_start_hour: u32,

    /// End of working hours (exclusive)
    #[arg(long, default_value = "19", value_parser = clap::value_parser!(u32).range(1..=24))]
    pub working_end_hour: u32,

    /// Out-of-hours share of the daily total above which a day is flagged
    #[arg(long, default_value = "30", value_parser = parse_percentage)]
    pub out_of_hours_threshold: f64,

    /// Fixed UTC offset for local days and hours (e.g. +01:00)
    #[arg(long, default_value = "+00:00", value_parser = parse_utc_offset, allow_hyphen_values = true)]
    pub utc_offset: chrono::FixedOffset,

    /// Do not flag days only because out-of-hours exceeds working-hours consumption
    #[arg(long, default_value_t = false)]
    pub no_flag_exceeds_working: bool,
}

/// Rows written for one findings table
#[derive(Debug, Clone, serde::Serialize)]
struct FindingsReport {
    pass: &'static str,
    path: PathBuf,
    rows: usize,
    flagged: usize,
}

impl ExtractArgs {
    /// Run the extraction, write outputs and print the summary
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let registry = Arc::new(ParameterRegistry::load_embedded()?);
        let config = ExtractionConfig::load(&self.config, &registry)?;
        let plan = match self.analysis_parameter(&config)? {
            Some(parameter) => Some(self.analysis_plan(&parameter, config.granularity())?),
            None => None,
        };

        if let Some(addr) = cli.metrics_addr {
            crate::metrics::init_metrics(addr).await?;
        }

        info!(
            "Extracting {} series ({}, {}) with concurrency {}",
            config.devices().len(),
            config.granularity(),
            config.date_range(),
            cli.concurrency
        );

        let fetcher = SeriesFetcher::from_settings(
            &config,
            registry,
            cli.http_settings(),
            Arc::new(RateLimiter::default()),
        )?;

        let progress = create_progress_bar(config.devices().len() as u64, cli.output_format);
        let callback: ProgressCallback = {
            let progress = progress.clone();
            Arc::new(move |series: &ExtractedSeries| {
                progress.set_message(format!("{} ({})", series.name, series.status.label()));
                progress.inc(1);
            })
        };

        let coordinator = ExtractionCoordinator::new(Arc::new(fetcher), cli.coordinator_settings())
            .with_shutdown(shutdown)
            .with_progress(callback);
        let outcome = coordinator.extract(&config).await;
        progress.finish_and_clear();

        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            CliError::InvalidArgument(format!(
                "Failed to create output directory {}: {e}",
                self.output_dir.display()
            ))
        })?;

        let dataset_path = self.output_dir.join(dataset_file_name(&outcome.dataset));
        let mut writer = CsvDatasetWriter::new(&dataset_path)?;
        let rows = writer.write_dataset(&outcome.dataset)?;
        writer.close()?;
        info!("Dataset written: {} rows to {}", rows, dataset_path.display());

        let reports = match &plan {
            Some(plan) => plan.run(&outcome.dataset, &self.output_dir)?,
            None => Vec::new(),
        };

        match cli.output_format {
            OutputFormat::Json => output_json(&outcome, &dataset_path, rows, &reports),
            OutputFormat::Human => output_human(&outcome, &dataset_path, rows, &reports),
        }

        match &outcome.summary.aggregate_failure {
            Some(failure) => Err(CliError::ExtractionFailed(failure.to_string())),
            None => Ok(()),
        }
    }

    /// Pick the analysed parameter; `None` when analyses are skipped
    fn analysis_parameter(&self, config: &ExtractionConfig) -> Result<Option<String>, CliError> {
        if self.skip_analysis {
            return Ok(None);
        }
        match &self.analysis_param {
            Some(parameter) if config.parameters().contains(parameter) => Ok(Some(parameter.clone())),
            Some(parameter) => Err(CliError::InvalidArgument(format!(
                "analysis parameter {parameter} is not among the requested params"
            ))),
            None if config.parameters().contains(DEFAULT_ANALYSIS_PARAMETER) => {
                Ok(Some(DEFAULT_ANALYSIS_PARAMETER.to_string()))
            }
            None => Ok(config.parameters().iter().next().cloned()),
        }
    }

    /// Build and validate the pass configs before any request is sent
    fn analysis_plan(&self, parameter: &str, granularity: Granularity) -> Result<AnalysisPlan, CliError> {
        let quality = QualityConfig {
            completeness_threshold: self.completeness_threshold,
            max_zero_ratio: self.max_zero_ratio,
            max_negative_ratio: self.max_negative_ratio,
            ..QualityConfig::new(parameter)
        };
        quality.validate()?;

        let trend = TrendConfig {
            periods: self.trend_periods as usize,
            threshold: self.trend_threshold,
            ..TrendConfig::new(parameter)
        };
        trend.validate()?;

        let out_of_hours = OutOfHoursConfig {
            working_start_hour: self.working_start_hour,
            working_end_hour: self.working_end_hour,
            threshold: self.out_of_hours_threshold,
            utc_offset: self.utc_offset,
            flag_when_exceeds_working: !self.no_flag_exceeds_working,
            ..OutOfHoursConfig::new(parameter)
        };
        out_of_hours.validate()?;

        let out_of_hours = if granularity == Granularity::Hourly {
            Some(out_of_hours)
        } else {
            warn!("Skipping out-of-hours analysis: it needs hourly data");
            None
        };

        Ok(AnalysisPlan {
            quality,
            trend,
            out_of_hours,
        })
    }
}

/// Validated pass configs for one run
#[derive(Debug, Clone)]
struct AnalysisPlan {
    quality: QualityConfig,
    trend: TrendConfig,
    out_of_hours: Option<OutOfHoursConfig>,
}

impl AnalysisPlan {
    fn run(&self, dataset: &AggregatedDataset, output_dir: &Path) -> Result<Vec<FindingsReport>, CliError> {
        let mut reports = vec![
            run_pass(&QualityPass, dataset, &self.quality, output_dir)?,
            run_pass(&TrendPass, dataset, &self.trend, output_dir)?,
        ];
        if let Some(out_of_hours) = &self.out_of_hours {
            reports.push(run_pass(&OutOfHoursPass, dataset, out_of_hours, output_dir)?);
        }
        Ok(reports)
    }
}

fn run_pass<P: AnalysisPass>(
    pass: &P,
    dataset: &AggregatedDataset,
    config: &P::Config,
    output_dir: &Path,
) -> Result<FindingsReport, CliError> {
    let rows = pass.analyze(dataset, config)?;
    let path = output_dir.join(format!("{}_findings.csv", pass.name()));

    let mut writer = CsvFindingsWriter::<P::Metrics>::new(&path)?;
    writer.write_rows(&rows)?;
    writer.close()?;

    let flagged = rows.iter().filter(|row| row.flagged).count();
    info!("{} analysis: {} rows, {} flagged", pass.name(), rows.len(), flagged);

    Ok(FindingsReport {
        pass: pass.name(),
        path,
        rows: rows.len(),
        flagged,
    })
}

fn dataset_file_name(dataset: &AggregatedDataset) -> String {
    let range = dataset.range();
    format!(
        "energy_data_{}_{}_{}.csv",
        dataset.granularity(),
        range.start().format("%Y%m%d"),
        range.end().format("%Y%m%d")
    )
}

fn output_json(outcome: &ExtractionOutcome, dataset_path: &Path, rows: u64, reports: &[FindingsReport]) {
    let status = match outcome.summary.aggregate_failure {
        Some(_) => "failed",
        None => "success",
    };
    let output = serde_json::json!({
        "status": status,
        "elapsed_secs": outcome.elapsed.as_secs_f64(),
        "dataset": {
            "path": dataset_path,
            "rows": rows,
            "summary": outcome.dataset.summary(),
        },
        "extraction": outcome.summary,
        "findings": reports,
    });
    println!("{output}");
}

fn output_human(outcome: &ExtractionOutcome, dataset_path: &Path, rows: u64, reports: &[FindingsReport]) {
    let summary = &outcome.summary;
    let dataset = outcome.dataset.summary();

    println!("\nExtraction finished in {:.1}s", outcome.elapsed.as_secs_f64());
    println!(
        "Devices: {} total, {} ok, {} partial, {} failed",
        summary.total,
        summary.succeeded,
        summary.partial.len(),
        summary.failed.len()
    );
    println!("Success rate: {:.1}%", dataset.success_rate);
    println!(
        "Dataset: {} ({} rows, {} with values)",
        dataset_path.display(),
        rows,
        dataset.present_records
    );

    for device in &summary.partial {
        println!("  partial: {} [{}] {}: {}", device.name, device.device_id, device.parameter, device.reason);
    }
    for device in &summary.failed {
        eprintln!("  failed: {} [{}] {}: {}", device.name, device.device_id, device.parameter, device.reason);
    }

    for report in reports {
        println!(
            "{}: {} rows, {} flagged -> {}",
            report.pass,
            report.rows,
            report.flagged,
            report.path.display()
        );
    }

    if let Some(failure) = &summary.aggregate_failure {
        eprintln!("\nExtraction failed: {failure}");
    }
}

/// Create progress bar with style; hidden for JSON output
fn create_progress_bar(total: u64, format: OutputFormat) -> ProgressBar {
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("Fetching series");
    pb
}
