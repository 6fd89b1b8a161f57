//! `stream` command implementation.

use std::collections::BTreeMap;
use std::path::Path;

use acquisition::{run_sync_stream, StreamOptions};
use anyhow::{Context, Result};
use connector::{Connector, ServiceLauncher};
use contracts::{DeviceSpec, Devices, TimestampsConfig};
use stream_merge::{MergedFileSink, StallPolicy, ZmqBlockSource};
use tracing::info;

use super::seconds;
use crate::cli::StreamArgs;

const STREAM_DEVICE: &str = "stream";

/// Execute the `stream` command
pub async fn run_stream(args: &StreamArgs) -> Result<()> {
    let mut options = StreamOptions::new(&args.address, &args.output_file);
    options.channels = args.channels.clone();
    options.duration = seconds("duration", args.duration)?;
    options.sub_duration = seconds("sub-duration", args.sub_duration)?;
    options.demo = args.demo;
    if let Some(after) = args.partial_after {
        options.stall = StallPolicy::PartialAfter(seconds("partial-after", after)?);
    }

    let mut spec = DeviceSpec::new(&args.address);
    spec.timestamps = Some(TimestampsConfig {
        dlt_host: args.dlt_host.clone(),
        ..TimestampsConfig::default()
    });
    let devices: Devices = BTreeMap::from([(STREAM_DEVICE.to_string(), spec)]);

    let mut connector = Connector::new();
    if let Some(ref dir) = args.dlt_dir {
        let runtime_dir = args
            .output_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        connector = connector.with_service(ServiceLauncher::new(dir, runtime_dir));
    }
    let mut connections = connector
        .connect_all(&devices)
        .await
        .with_context(|| format!("Failed to connect {}", args.address))?;
    let link = connections.get_mut(STREAM_DEVICE)?;

    let sink = MergedFileSink::create(&args.output_file)
        .with_context(|| format!("Failed to create {}", args.output_file.display()))?;

    info!(
        address = %args.address,
        channels = ?options.channels,
        duration_secs = options.duration.as_secs_f64(),
        sub_duration_secs = options.sub_duration.as_secs_f64(),
        output = %args.output_file.display(),
        "Starting synchronized stream"
    );

    let host = args.dlt_host.clone();
    let outcome = run_sync_stream(
        link,
        &options,
        |channel| {
            let host = host.clone();
            async move { ZmqBlockSource::connect(&host, channel).await }
        },
        sink,
    )
    .await
    .context("Streaming session failed")?;

    let merge = &outcome.merge;
    println!("\n=== Stream Statistics ===\n");
    println!("   ├─ Sub-acquisitions merged: {}", merge.indices);
    println!("   ├─ Partially merged: {}", merge.partial_indices);
    println!("   ├─ Late blocks: {}", merge.late_blocks);
    println!("   ├─ Timestamps: {}", merge.merged_timestamps);
    println!("   ├─ Per sub-acquisition: {}", merge.per_index);
    println!("   └─ Output: {}", args.output_file.display());
    println!();

    if !outcome.is_clean() {
        anyhow::bail!(
            "Streaming sessions reported {} error(s)",
            outcome.errors.len()
        );
    }
    Ok(())
}
