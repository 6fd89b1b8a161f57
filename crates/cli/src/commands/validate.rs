//! `validate` command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use contracts::AcquisitionSetup;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    master: String,
    high_resolution: bool,
    device_count: usize,
    raw_acquisitions: usize,
    histogram_acquisitions: usize,
    p_max_ps: u64,
    max_trigger_delay_ps: u64,
}

impl ConfigSummary {
    fn new(setup: &AcquisitionSetup) -> Self {
        Self {
            master: setup.master().to_string(),
            high_resolution: setup.high_resolution,
            device_count: setup.devices.len(),
            raw_acquisitions: setup
                .devices
                .values()
                .map(|d| d.raw_acquisitions().count())
                .sum(),
            histogram_acquisitions: setup
                .devices
                .values()
                .map(|d| d.histogram_acquisitions().count())
                .sum(),
            p_max_ps: setup.timing.p_max,
            max_trigger_delay_ps: setup.timing.max_delay(),
        }
    }
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(&args.config);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(path: &Path) -> ValidationResult {
    let config_path = path.display().to_string();

    if !path.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", path.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(path) {
        Ok(setup) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: if setup.warnings.is_empty() {
                None
            } else {
                Some(setup.warnings.clone())
            },
            summary: Some(ConfigSummary::new(&setup)),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Master: {}", summary.master);
            println!("  High resolution: {}", summary.high_resolution);
            println!("  Devices: {}", summary.device_count);
            println!("  Raw acquisitions: {}", summary.raw_acquisitions);
            println!("  Histogram acquisitions: {}", summary.histogram_acquisitions);
            println!("  Max propagation time: {} ps", summary.p_max_ps);
            println!("  Max trigger delay: {} ps", summary.max_trigger_delay_ps);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
