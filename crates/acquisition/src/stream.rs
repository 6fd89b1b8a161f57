//! Synchronized streaming session on one device
//!
//! The record generator repeats sub-acquisitions so the bulk-transfer service streams
//! each raw channel at regular intervals. Raw channels run without reference, every
//! timestamp being relative to the start of its sub-acquisition, and the merge engine
//! rebuilds one global sequence from them.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use configurator::commands;
use connector::{DeviceLink, SessionId};
use contracts::{BlockSource, ContractError, MergedSink, Transport};
use serde::Serialize;
use stream_merge::{stream_port, MergeConfig, MergeHandle, MergeStats, StallPolicy};
use tracing::{debug, info, instrument, warn};

use crate::report::{query_failure, raw_errors};
use crate::session::WaitPolicy;

/// Minimum dead time between two sub-acquisitions
pub const DEFAULT_DEAD_TIME: Duration = Duration::from_nanos(400);

/// Default sub-acquisition duration
pub const DEFAULT_SUB_DURATION: Duration = Duration::from_secs(1);

/// Streaming session options
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Instrument address
    pub address: String,
    /// Raw channels to stream (1..=4)
    pub channels: Vec<u8>,
    pub duration: Duration,
    pub sub_duration: Duration,
    pub dead_time: Duration,
    /// Feed every channel from the internal generators
    pub demo: bool,
    pub output_file: PathBuf,
    pub stall: StallPolicy,
    pub wait: WaitPolicy,
}

impl StreamOptions {
    pub fn new(address: impl Into<String>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            channels: vec![1, 2, 3, 4],
            duration: Duration::from_secs(3),
            sub_duration: DEFAULT_SUB_DURATION,
            dead_time: DEFAULT_DEAD_TIME,
            demo: false,
            output_file: output_file.into(),
            stall: StallPolicy::Wait,
            wait: WaitPolicy::default(),
        }
    }

    /// Record pulse width and period (ps)
    pub fn timer(&self) -> Result<(u64, u64), ContractError> {
        let pwid = picoseconds(self.sub_duration)?;
        let pper = pwid
            .checked_add(picoseconds(self.dead_time)?)
            .ok_or_else(|| ContractError::acquisition("sub-acquisition period overflows"))?;
        Ok((pwid, pper))
    }

    fn validate(&self) -> Result<(), ContractError> {
        if self.channels.is_empty() {
            return Err(ContractError::config("no channel to stream"));
        }
        if let Some(c) = self.channels.iter().find(|c| !(1..=4).contains(*c)) {
            return Err(ContractError::config(format!(
                "channel {c} does not exist (1 to 4)"
            )));
        }
        if self.dead_time < DEFAULT_DEAD_TIME {
            return Err(ContractError::config(format!(
                "dead time {:?} is below the {:?} minimum",
                self.dead_time, DEFAULT_DEAD_TIME
            )));
        }
        Ok(())
    }
}

/// Outcome of a streaming session
#[derive(Debug, Clone, Serialize)]
pub struct StreamOutcome {
    /// Errors reported while closing the sessions
    pub errors: Vec<String>,
    #[serde(skip)]
    pub merge: MergeStats,
    pub merged_timestamps: u64,
}

impl StreamOutcome {
    /// Sessions closed without errors
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run a synchronized streaming session
///
/// `open` connects the block source of a channel; sources are opened before the
/// service starts streaming so no block is missed.
#[instrument(name = "sync_stream", skip_all, fields(address = %options.address, channels = ?options.channels))]
pub async fn run_sync_stream<T, S, F, Fut, K>(
    link: &mut DeviceLink<T>,
    options: &StreamOptions,
    mut open: F,
    sink: K,
) -> Result<StreamOutcome, ContractError>
where
    T: Transport,
    S: BlockSource + 'static,
    F: FnMut(u8) -> Fut,
    Fut: Future<Output = Result<S, ContractError>>,
    K: MergedSink + 'static,
{
    options.validate()?;
    let (pwid, pper) = options.timer()?;
    let mut channels = options.channels.clone();
    channels.sort_unstable();
    channels.dedup();

    close_stale_sessions(link).await;

    let mut setup = Vec::new();
    if options.demo {
        setup.extend(commands::demo_generators(&channels));
    }
    setup.extend(channels.iter().map(|&c| commands::referenceless_raw(c)));
    setup.extend(commands::sub_acquisition_timer(pwid, pper));
    for command in &setup {
        link.scpi.exec(command).await?;
    }

    let mut sources = Vec::with_capacity(channels.len());
    for &channel in &channels {
        sources.push(open(channel).await?);
    }
    let merger = MergeHandle::spawn(
        MergeConfig::new(pper).with_stall(options.stall),
        sources,
        sink,
    )?;
    info!(pwid, pper, "streaming sub-acquisitions");

    match stream(link, options, &channels).await {
        Ok(errors) => {
            let merge = merger.shutdown().await?;
            if !errors.is_empty() {
                warn!(
                    "Streaming sessions reported errors:\n  * {}",
                    errors.join("\n  * ")
                );
            }
            Ok(StreamOutcome {
                errors,
                merged_timestamps: merge.merged_timestamps,
                merge,
            })
        }
        Err(e) => {
            close_stale_sessions(link).await;
            match merger.abort().await {
                Ok(stats) => debug!(merged = stats.merged_timestamps, "partial merge kept"),
                Err(merge_error) => warn!(error = %merge_error, "merge of buffered blocks failed"),
            }
            Err(e)
        }
    }
}

/// Open the streams, play, stop, wait and close; returns the reported errors
async fn stream<T: Transport>(
    link: &mut DeviceLink<T>,
    options: &StreamOptions,
    channels: &[u8],
) -> Result<Vec<String>, ContractError> {
    let mut sessions: Vec<(u8, SessionId)> = Vec::with_capacity(channels.len());
    for &channel in channels {
        link.scpi
            .exec(&format!("RAW{channel}:ERRORS:CLEAR"))
            .await?;
        let id = link
            .dlt
            .start_stream(&options.address, channel, stream_port(channel))
            .await?;
        sessions.push((channel, id));
        link.scpi.exec(&format!("RAW{channel}:SEND ON")).await?;
    }

    link.scpi.exec("REC:PLAY").await?;
    tokio::time::sleep(options.duration).await;
    link.scpi.exec("REC:STOP").await?;

    let mut pending = sessions.clone();
    let mut polls = 0;
    loop {
        let mut busy = Vec::with_capacity(pending.len());
        for (channel, id) in pending {
            let status = link.dlt.status(&id).await?;
            if !options.wait.is_settled(&status) {
                busy.push((channel, id));
            }
        }
        pending = busy;
        if pending.is_empty() {
            break;
        }
        polls += 1;
        options.wait.check_polls(polls, pending.len())?;
        tokio::time::sleep(options.wait.poll_interval).await;
    }

    let mut errors = Vec::new();
    for (channel, id) in &sessions {
        match link.dlt.stop(id).await {
            Ok(reported) => errors.extend(
                reported
                    .into_iter()
                    .map(|e| format!("channel {channel}: DataLinkTarget error: {}", e.description)),
            ),
            Err(e) => errors.push(query_failure(&format!("stop {id}"), &e)),
        }
        errors.extend(
            raw_errors(&mut link.scpi, *channel)
                .await
                .into_iter()
                .map(|e| format!("channel {channel}: {e}")),
        );
    }
    Ok(errors)
}

/// Stop every session the service still runs
async fn close_stale_sessions<T: Transport>(link: &mut DeviceLink<T>) {
    match link.dlt.list().await {
        Ok(ids) => {
            for id in ids {
                if let Err(e) = link.dlt.stop(&id).await {
                    debug!(session = %id, error = %e, "unable to close capture session");
                }
            }
        }
        Err(e) => debug!(error = %e, "unable to list capture sessions"),
    }
}

fn picoseconds(duration: Duration) -> Result<u64, ContractError> {
    u64::try_from(duration.as_nanos() * 1_000)
        .map_err(|_| ContractError::acquisition(format!("duration {duration:?} is too long")))
}
