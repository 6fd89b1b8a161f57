//! Streaming contracts - block sources feeding the merge engine and merged sinks

use bytes::Bytes;

use crate::ContractError;

/// Width of one streamed timestamp (little-endian u64)
pub const TIMESTAMP_WIDTH: usize = 8;

/// One merged timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedRecord {
    pub channel: u8,
    /// Timestamp on the global clock (ps)
    pub timestamp: u64,
}

impl MergedRecord {
    pub fn new(channel: u8, timestamp: u64) -> Self {
        Self { channel, timestamp }
    }
}

/// Producer of binary blocks for one channel, one block per sub-acquisition
#[trait_variant::make(BlockSource: Send)]
pub trait LocalBlockSource {
    /// Channel number
    fn channel(&self) -> u8;

    /// Next block, `None` at end of stream
    async fn next_block(&mut self) -> Result<Option<Bytes>, ContractError>;
}

/// Merged output
#[trait_variant::make(MergedSink: Send)]
pub trait LocalMergedSink {
    /// Sink name (used for logging)
    fn name(&self) -> &str;

    /// Append records, already in ascending timestamp order
    async fn write(&mut self, records: &[MergedRecord]) -> Result<(), ContractError>;

    async fn flush(&mut self) -> Result<(), ContractError>;

    async fn close(&mut self) -> Result<(), ContractError>;
}
