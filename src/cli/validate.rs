//! Validation subcommand

use clap::Parser;
use std::path::PathBuf;

use super::{CliError, OutputFormat};
use crate::registry::ParameterRegistry;
use crate::ExtractionConfig;

/// Validate command for checking an extraction config
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// Extraction config file (JSON)
    pub config: PathBuf,
}

impl ValidateCommand {
    /// Load the config against the embedded registry and print what would be fetched
    pub async fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let registry = ParameterRegistry::load_embedded()?;
        let config = match ExtractionConfig::load(&self.config, &registry) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid config {}: {}", self.config.display(), e);
                return Err(e.into());
            }
        };

        let windows = config
            .date_range()
            .windows(config.granularity().max_window())
            .len();

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": true,
                    "config": self.config,
                    "granularity": config.granularity(),
                    "start": config.date_range().start(),
                    "end": config.date_range().end(),
                    "parameters": config.parameters(),
                    "devices": config.devices().len(),
                    "api_keys": config.api_keys().len(),
                    "windows_per_device": windows,
                });
                println!("{output}");
            }
            OutputFormat::Human => {
                println!("Valid config: {}", self.config.display());
                println!("  Granularity: {}", config.granularity());
                println!("  Range: {}", config.date_range());
                println!(
                    "  Parameters: {}",
                    config.parameters().iter().cloned().collect::<Vec<_>>().join(", ")
                );
                println!("  Devices: {}", config.devices().len());
                println!("  API keys: {}", config.api_keys().len());
                println!("  Requests per device: {windows}");
            }
        }
        Ok(())
    }
}
