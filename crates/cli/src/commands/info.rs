//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{AcquisitionPair, AcquisitionSetup, WalkEvent};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    master: String,
    high_resolution: bool,
    p_max_ps: u64,
    shifted: bool,
    devices: Vec<DeviceInfo>,
}

#[derive(Serialize)]
struct DeviceInfo {
    name: String,
    ip: String,
    depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<u8>,
    wire_latency_ps: u64,
    propagation_time_ps: u64,
    trigger_delay_ps: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    timestamps: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    histograms: Vec<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let setup = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&setup, args.acquisitions);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&setup, args.acquisitions);
    }

    Ok(())
}

/// Devices in layout order
fn build_config_info(setup: &AcquisitionSetup, acquisitions: bool) -> ConfigInfo {
    let tree = &setup.layout;
    let devices = tree
        .walk()
        .filter_map(|event| match event {
            WalkEvent::Enter(id) => Some(tree.node(id)),
            WalkEvent::Leave(_) => None,
        })
        .map(|node| {
            let spec = setup.device(&node.device);
            let timing = setup.timing.get(&node.device);
            let labels = |pairs: Vec<AcquisitionPair>| -> Vec<String> {
                if acquisitions {
                    pairs.iter().map(|p| p.label()).collect()
                } else {
                    Vec::new()
                }
            };
            DeviceInfo {
                name: node.device.clone(),
                ip: spec.map(|s| s.ip.clone()).unwrap_or_default(),
                depth: node.depth,
                parent: node.parent.map(|p| tree.node(p).device.clone()),
                output: node.output.map(|c| c.get()),
                wire_latency_ps: node.wire_latency,
                propagation_time_ps: timing.map_or(0, |t| t.propagation_time),
                trigger_delay_ps: timing.map_or(0, |t| t.trigger_delay),
                timestamps: labels(
                    spec.map(|s| s.raw_acquisitions().map(|(_, p)| p).collect())
                        .unwrap_or_default(),
                ),
                histograms: labels(
                    spec.map(|s| s.histogram_acquisitions().map(|(_, p)| p).collect())
                        .unwrap_or_default(),
                ),
            }
        })
        .collect();

    ConfigInfo {
        master: setup.master().to_string(),
        high_resolution: setup.high_resolution,
        p_max_ps: setup.timing.p_max,
        shifted: setup.timing.shifted,
        devices,
    }
}

fn print_config_info(setup: &AcquisitionSetup, acquisitions: bool) {
    let info = build_config_info(setup, acquisitions);

    println!("=== tcsync layout ===\n");
    println!("Master: {}", info.master);
    println!(
        "Resolution: {}",
        if info.high_resolution { "high" } else { "low" }
    );
    println!("Max propagation time: {} ps", info.p_max_ps);
    if info.shifted {
        println!("Delays shifted above the minimum trigger delay");
    }
    println!();

    for device in &info.devices {
        let indent = "   ".repeat(device.depth);
        let link = match device.output {
            Some(output) => format!("output {output} -> "),
            None => String::new(),
        };
        println!("{indent}└─ {link}{} ({})", device.name, device.ip);
        println!(
            "{indent}   depth {}, wire {} ps, propagation {} ps, trigger delay {} ps",
            device.depth,
            device.wire_latency_ps,
            device.propagation_time_ps,
            device.trigger_delay_ps
        );
        if !device.timestamps.is_empty() {
            println!("{indent}   timestamps: {}", device.timestamps.join(", "));
        }
        if !device.histograms.is_empty() {
            println!("{indent}   histograms: {}", device.histograms.join(", "));
        }
    }

    println!();
}
