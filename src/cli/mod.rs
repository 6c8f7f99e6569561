//! CLI command implementations

pub mod error;
pub mod extract;
pub mod validate;

pub use error::CliError;
pub use extract::ExtractArgs;
pub use validate::ValidateCommand;

use chrono::FixedOffset;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::{CoordinatorSettings, DEFAULT_CONCURRENCY, DEFAULT_FAILURE_THRESHOLD};
use crate::fetcher::{HttpClientSettings, RetryPolicy};

/// Maximum allowed concurrency to prevent self-inflicted rate limiting
const MAX_CONCURRENCY: usize = 32;

/// Energy metering extractor CLI
#[derive(Parser, Debug)]
#[command(name = "energy-extract")]
#[command(about = "Extract metering time series and analyse consumption", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Number of concurrent device fetches (default: 5, max: 32)
    ///
    /// All fetches share one request-rate limiter, so raising this mostly
    /// helps when individual requests are slow.
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Maximum number of retries for failed requests (default: 3, range: 0-10)
    #[arg(long, global = true, default_value = "3", value_parser = clap::value_parser!(u32).range(0..=10))]
    pub max_retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value = "30", value_parser = clap::value_parser!(u64).range(1..=600))]
    pub request_timeout_secs: u64,

    /// Overall deadline for the extraction in seconds
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Metering API base URL
    #[arg(long, global = true, default_value = crate::fetcher::http::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Failed device fraction above which the run is reported as failed
    #[arg(long, global = true, default_value_t = DEFAULT_FAILURE_THRESHOLD, value_parser = parse_fraction)]
    pub failure_threshold: f64,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// HTTP client settings from the global flags
    pub fn http_settings(&self) -> HttpClientSettings {
        HttpClientSettings {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy::with_max_retries(self.max_retries),
        }
    }

    /// Coordinator settings from the global flags
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            concurrency: self.concurrency,
            deadline: self.deadline_secs.map(Duration::from_secs),
            failure_threshold: self.failure_threshold,
        }
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract series for every configured device and run the analyses
    Extract(ExtractArgs),

    /// Load and validate an extraction config without touching the network
    Validate(ValidateCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Parse a fraction in [0, 1]
fn parse_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is outside [0, 1]"));
    }
    Ok(value)
}

/// Parse a percentage in [0, 100]
pub(crate) fn parse_percentage(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{value} is outside [0, 100]"));
    }
    Ok(value)
}

/// Parse a fixed UTC offset: `Z`, `+HH`, `+HH:MM` or `-HH:MM`
pub(crate) fn parse_utc_offset(s: &str) -> Result<FixedOffset, String> {
    let input = s.trim();
    if input.eq_ignore_ascii_case("z") || input.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }

    let (sign, rest) = if let Some(rest) = input.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = input.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(format!("offset '{s}' must start with + or -"));
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => (rest, "0"),
    };
    let hours: i32 = hours
        .parse()
        .map_err(|_| format!("invalid hours in offset '{s}'"))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| format!("invalid minutes in offset '{s}'"))?;
    if hours > 23 || minutes > 59 {
        return Err(format!("offset '{s}' out of range"));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("offset '{s}' out of range"))
}
