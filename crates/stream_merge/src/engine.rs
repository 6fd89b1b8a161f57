//! MergeHandle - channel receivers plus the single merge worker

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{BlockSource, ContractError, MergedSink};
use observability::{format_size, RunningStats, StatsSummary};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::ChannelBuffer;
use crate::merge::merge_index;
use crate::receiver::receive;

/// What the worker does when some channels lag behind on the next message index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StallPolicy {
    /// Wait until every channel delivered the index
    #[default]
    Wait,
    /// Merge with the channels that delivered it once the index has been incomplete
    /// for this long
    PartialAfter(Duration),
}

/// How long `shutdown` waits for the end-of-stream message of every channel
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Merge engine configuration
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Sub-acquisition repeat period (ps)
    pub period: u64,
    pub stall: StallPolicy,
    /// Receivers still running after this are stopped by `shutdown`
    pub drain_timeout: Duration,
}

impl MergeConfig {
    pub fn new(period: u64) -> Self {
        Self {
            period,
            stall: StallPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_stall(mut self, stall: StallPolicy) -> Self {
        self.stall = stall;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

/// Outcome of a merge run
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    /// Message indices written to the sink
    pub indices: usize,
    /// Indices merged without every channel
    pub partial_indices: usize,
    pub merged_timestamps: u64,
    /// Blocks discarded because their index was already merged
    pub late_blocks: usize,
    /// Blocks received per channel
    pub received: BTreeMap<u8, usize>,
    /// Timestamps per merged index
    pub per_index: StatsSummary,
}

/// Handle to running receivers and merge worker
pub struct MergeHandle {
    channels: Vec<u8>,
    receivers: Vec<(u8, JoinHandle<Result<usize, ContractError>>)>,
    worker: JoinHandle<Result<MergeStats, ContractError>>,
    closing: Arc<AtomicBool>,
    wake: Arc<Notify>,
    /// Set to stop receivers still waiting on their source
    stop: watch::Sender<bool>,
    drain_timeout: Duration,
}

impl MergeHandle {
    /// Spawn one receiver per source and the merge worker owning `sink`
    ///
    /// # Errors
    /// No source, or two sources for the same channel
    pub fn spawn<S, K>(config: MergeConfig, sources: Vec<S>, sink: K) -> Result<Self, ContractError>
    where
        S: BlockSource + 'static,
        K: MergedSink + 'static,
    {
        if sources.is_empty() {
            return Err(ContractError::acquisition("no channel to merge"));
        }
        let mut sources: BTreeMap<u8, S> = sources.into_iter().try_fold(
            BTreeMap::new(),
            |mut acc, source| {
                let channel = source.channel();
                match acc.insert(channel, source) {
                    Some(_) => Err(ContractError::acquisition(format!(
                        "channel {channel} is streamed twice"
                    ))),
                    None => Ok(acc),
                }
            },
        )?;

        let wake = Arc::new(Notify::new());
        let (stop, stopped) = watch::channel(false);
        let closing = Arc::new(AtomicBool::new(false));
        let channels: Vec<u8> = sources.keys().copied().collect();
        let buffers: Vec<Arc<ChannelBuffer>> = channels
            .iter()
            .map(|&channel| Arc::new(ChannelBuffer::new(channel)))
            .collect();

        let receivers = buffers
            .iter()
            .filter_map(|buffer| {
                let source = sources.remove(&buffer.channel())?;
                let task = tokio::spawn(receive(
                    source,
                    Arc::clone(buffer),
                    Arc::clone(&wake),
                    stopped.clone(),
                ));
                Some((buffer.channel(), task))
            })
            .collect();

        let drain_timeout = config.drain_timeout;
        let worker = MergeWorker {
            name: sink.name().to_string(),
            config,
            buffers,
            sink,
            cursor: 0,
            stalled_since: None,
            stats: MergeStats::default(),
            sizes: RunningStats::default(),
        };
        let worker = tokio::spawn(worker.run(Arc::clone(&closing), Arc::clone(&wake)));

        Ok(Self {
            channels,
            receivers,
            worker,
            closing,
            wake,
            stop,
            drain_timeout,
        })
    }

    /// Merged channels, ascending
    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    /// Wait for every receiver to end, then let the worker drain and close the sink
    ///
    /// Receivers whose stream has not ended within the drain timeout are stopped and
    /// what they buffered is still merged.
    #[instrument(name = "merge_handle_shutdown", skip(self), fields(channels = ?self.channels))]
    pub async fn shutdown(self) -> Result<MergeStats, ContractError> {
        let deadline = Instant::now() + self.drain_timeout;
        self.finish(Some(deadline)).await
    }

    /// Stop receiving now, then merge what was already buffered
    ///
    /// Used when the streams will not end by themselves (acquisition failure).
    #[instrument(name = "merge_handle_abort", skip(self), fields(channels = ?self.channels))]
    pub async fn abort(self) -> Result<MergeStats, ContractError> {
        self.stop.send_replace(true);
        self.finish(None).await
    }

    async fn finish(self, deadline: Option<Instant>) -> Result<MergeStats, ContractError> {
        let mut received = BTreeMap::new();
        let mut receiver_error = None;
        for (channel, mut task) in self.receivers {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        if !self.stop.send_replace(true) {
                            warn!(
                                channel,
                                timeout = ?self.drain_timeout,
                                "stream did not end in time, stopping receivers"
                            );
                        }
                        task.await
                    }
                },
                None => task.await,
            };
            match joined {
                Ok(Ok(count)) => {
                    received.insert(channel, count);
                }
                Ok(Err(e)) => {
                    receiver_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(channel, error = ?e, "receiver task panicked");
                    receiver_error.get_or_insert(ContractError::acquisition(format!(
                        "receiver of channel {channel} panicked"
                    )));
                }
            }
        }
        debug!("receivers joined");

        self.closing.store(true, Ordering::Release);
        self.wake.notify_one();

        let mut stats = self
            .worker
            .await
            .map_err(|e| ContractError::acquisition(format!("merge worker panicked: {e}")))??;
        if let Some(e) = receiver_error {
            return Err(e);
        }
        stats.received = received;
        Ok(stats)
    }
}

struct MergeWorker<K> {
    name: String,
    config: MergeConfig,
    /// Sorted by channel
    buffers: Vec<Arc<ChannelBuffer>>,
    sink: K,
    /// Next message index to merge
    cursor: usize,
    stalled_since: Option<Instant>,
    stats: MergeStats,
    sizes: RunningStats,
}

impl<K: MergedSink> MergeWorker<K> {
    #[instrument(name = "merge_worker_loop", skip_all, fields(sink = %self.name, period = self.config.period))]
    async fn run(
        mut self,
        closing: Arc<AtomicBool>,
        wake: Arc<Notify>,
    ) -> Result<MergeStats, ContractError> {
        debug!(sink = %self.name, "merge worker started");
        let result = self.merge_loop(&closing, &wake).await;

        // Cleanup
        let closed = match self.sink.flush().await {
            Ok(()) => self.sink.close().await,
            Err(e) => {
                if let Err(close) = self.sink.close().await {
                    error!(sink = %self.name, error = %close, "Close failed on shutdown");
                }
                Err(e)
            }
        };
        match (result, closed) {
            (Ok(()), Ok(())) => {
                self.stats.per_index = self.sizes.summary();
                info!(
                    sink = %self.name,
                    indices = self.stats.indices,
                    partial_indices = self.stats.partial_indices,
                    merged_timestamps = self.stats.merged_timestamps,
                    late_blocks = self.stats.late_blocks,
                    "merge complete"
                );
                Ok(self.stats)
            }
            (Err(e), closed) => {
                if let Err(close) = closed {
                    error!(sink = %self.name, error = %close, "Close failed on shutdown");
                }
                error!(sink = %self.name, index = self.cursor, error = %e, "merge worker stopped");
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
        }
    }

    async fn merge_loop(&mut self, closing: &AtomicBool, wake: &Notify) -> Result<(), ContractError> {
        loop {
            // read before merging so everything pushed by joined receivers is seen
            let closing_now = closing.load(Ordering::Acquire);
            self.release_late();
            while self.all_ready(self.cursor) {
                self.merge_cursor().await?;
            }

            if closing_now {
                return self.drain().await;
            }

            match self.config.stall {
                StallPolicy::Wait => wake.notified().await,
                StallPolicy::PartialAfter(limit) => {
                    if !self.any_ready(self.cursor) {
                        self.stalled_since = None;
                        wake.notified().await;
                        continue;
                    }
                    let deadline = *self.stalled_since.get_or_insert_with(Instant::now) + limit;
                    if Instant::now() >= deadline {
                        self.merge_cursor().await?;
                    } else {
                        // timing out just re-runs the loop
                        let _ = tokio::time::timeout_at(deadline, wake.notified()).await;
                    }
                }
            }
        }
    }

    /// Merge whatever is left once every receiver has ended
    async fn drain(&mut self) -> Result<(), ContractError> {
        while self
            .buffers
            .iter()
            .any(|buffer| buffer.has_pending_from(self.cursor))
        {
            self.merge_cursor().await?;
        }
        debug!(sink = %self.name, next_index = self.cursor, "buffers drained");
        Ok(())
    }

    fn all_ready(&self, index: usize) -> bool {
        self.buffers.iter().all(|buffer| buffer.is_ready(index))
    }

    fn any_ready(&self, index: usize) -> bool {
        self.buffers.iter().any(|buffer| buffer.is_ready(index))
    }

    /// Merge the cursor index with every channel that has it, then advance
    async fn merge_cursor(&mut self) -> Result<(), ContractError> {
        let index = self.cursor;
        let mut blocks = Vec::with_capacity(self.buffers.len());
        let mut missing = Vec::new();
        for buffer in &self.buffers {
            match buffer.take(index) {
                Some(block) => blocks.push((buffer.channel(), block)),
                None => missing.push(buffer.channel()),
            }
        }
        self.cursor += 1;
        self.stalled_since = None;
        if blocks.is_empty() {
            return Ok(());
        }

        let records = merge_index(index, self.config.period, &blocks)?;
        if !records.is_empty() {
            self.sink.write(&records).await?;
        }

        let partial = !missing.is_empty();
        if partial {
            warn!(index, missing = ?missing, "merging message without every channel");
            self.stats.partial_indices += 1;
        }
        self.stats.indices += 1;
        self.stats.merged_timestamps += records.len() as u64;
        self.sizes.push(records.len() as f64);

        let buffered: usize = self.buffers.iter().map(|b| b.buffered_bytes()).sum();
        debug!(
            index,
            timestamps = records.len(),
            "merged message #{} (still buffered: {})",
            index,
            format_size(buffered)
        );
        observability::record_merged_index(index, records.len(), partial);
        for buffer in &self.buffers {
            observability::record_buffered_bytes(buffer.channel(), buffer.buffered_bytes());
        }
        Ok(())
    }

    /// Discard blocks whose index was already merged without them
    fn release_late(&mut self) {
        for buffer in &self.buffers {
            for index in buffer.release_before(self.cursor) {
                warn!(
                    channel = buffer.channel(),
                    index, "late block discarded, its message was already merged"
                );
                observability::record_late_block(buffer.channel());
                self.stats.late_blocks += 1;
            }
        }
    }
}
