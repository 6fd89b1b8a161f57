//! `run` command implementation.

use anyhow::{Context, Result};
use acquisition::AcquisitionController;
use connector::{Connector, ServiceLauncher};
use contracts::AcquisitionSetup;
use tracing::info;

use super::{seconds, shutdown_signal};
use crate::cli::RunArgs;
use crate::pipeline::{Orchestrator, RunPlan};

/// Execute the `run` command
pub async fn run_acquisition(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let setup = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        master = %setup.master(),
        devices = setup.devices.len(),
        p_max = setup.timing.p_max,
        high_resolution = setup.high_resolution,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&setup);
        return Ok(());
    }

    let plan = RunPlan {
        output: args.output.clone(),
        duration: seconds("duration", args.duration)?,
        repeat: args.repeat,
    };
    acquisition::prepare_output_dir(&plan.output)
        .with_context(|| format!("Failed to prepare {}", plan.output.display()))?;

    let mut connector = Connector::new();
    if let Some(ref dir) = args.dlt_dir {
        connector = connector.with_service(ServiceLauncher::new(dir, &plan.output));
    }
    let mut connections = connector
        .connect_all(&setup.devices)
        .await
        .context("Failed to connect devices")?;

    configurator::configure(&setup, &mut connections)
        .await
        .context("Failed to configure devices")?;
    info!("All devices configured");

    let controller = AcquisitionController::new(setup, connections);
    let stats = Orchestrator::new(controller, plan)
        .run(shutdown_signal())
        .await?;
    stats.print_summary();

    if stats.interrupted {
        anyhow::bail!("Acquisition interrupted");
    }
    info!("tcsync finished");
    Ok(())
}

/// Print configuration summary for dry-run mode
fn print_config_summary(setup: &AcquisitionSetup) {
    println!("\n=== Configuration Summary ===\n");
    println!("Master: {}", setup.master());
    println!(
        "Resolution: {}",
        if setup.high_resolution { "high" } else { "low" }
    );
    println!("\nDevices ({}):", setup.devices.len());
    for (name, spec) in &setup.devices {
        println!(
            "  - {} ({}) - {} raw, {} histogram acquisitions, trigger delay {} ps",
            name,
            spec.ip,
            spec.raw_acquisitions().count(),
            spec.histogram_acquisitions().count(),
            setup.timing.trigger_delay(name)
        );
    }
    println!();
}
