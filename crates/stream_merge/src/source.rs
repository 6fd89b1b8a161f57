//! Block sources: ZeroMQ PULL stream and scripted in-memory source

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use contracts::{BlockSource, ContractError, STREAM_BASE_PORT};
use zeromq::{PullSocket, Socket, SocketRecv};

/// Stream port of a channel
pub fn stream_port(channel: u8) -> u16 {
    STREAM_BASE_PORT + u16::from(channel)
}

/// Blocks pushed by the bulk-transfer service for one channel
///
/// An empty message marks the end of the stream.
pub struct ZmqBlockSource {
    channel: u8,
    endpoint: String,
    socket: PullSocket,
}

impl ZmqBlockSource {
    /// Connect a PULL socket to `tcp://host:(4241 + channel)`
    pub async fn connect(host: &str, channel: u8) -> Result<Self, ContractError> {
        let endpoint = format!("tcp://{host}:{}", stream_port(channel));
        let mut socket = PullSocket::new();
        socket.connect(&endpoint).await.map_err(|e| {
            ContractError::acquisition(format!(
                "unable to open stream of channel {channel} at {endpoint}: {e}"
            ))
        })?;
        Ok(Self {
            channel,
            endpoint,
            socket,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl BlockSource for ZmqBlockSource {
    fn channel(&self) -> u8 {
        self.channel
    }

    async fn next_block(&mut self) -> Result<Option<Bytes>, ContractError> {
        let message = self.socket.recv().await.map_err(|e| {
            ContractError::acquisition(format!(
                "stream of channel {} ({}) failed: {e}",
                self.channel, self.endpoint
            ))
        })?;

        let block: Bytes = match message.into_vec().as_slice() {
            [single] => single.clone(),
            frames => frames.concat().into(),
        };
        Ok((!block.is_empty()).then_some(block))
    }
}

/// Scripted source yielding prepared blocks, each after an optional delay
#[derive(Debug, Clone)]
pub struct MemorySource {
    channel: u8,
    blocks: VecDeque<(Duration, Bytes)>,
}

impl MemorySource {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            blocks: VecDeque::new(),
        }
    }

    /// Queue a block of little-endian timestamps
    pub fn block(self, timestamps: &[u64]) -> Self {
        self.block_after(Duration::ZERO, timestamps)
    }

    /// Queue a block delivered `delay` after the previous one
    pub fn block_after(mut self, delay: Duration, timestamps: &[u64]) -> Self {
        let raw: Vec<u8> = timestamps.iter().flat_map(|t| t.to_le_bytes()).collect();
        self.blocks.push_back((delay, raw.into()));
        self
    }

    /// Queue raw bytes
    pub fn raw(mut self, block: Bytes) -> Self {
        self.blocks.push_back((Duration::ZERO, block));
        self
    }
}

impl BlockSource for MemorySource {
    fn channel(&self) -> u8 {
        self.channel
    }

    async fn next_block(&mut self) -> Result<Option<Bytes>, ContractError> {
        let Some((delay, block)) = self.blocks.pop_front() else {
            return Ok(None);
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_ports() {
        assert_eq!(stream_port(1), 4242);
        assert_eq!(stream_port(4), 4245);
    }

    #[tokio::test]
    async fn test_memory_source() {
        let mut source = MemorySource::new(3).block(&[1, 2]).raw(Bytes::new());
        assert_eq!(source.channel(), 3);
        assert_eq!(source.next_block().await.unwrap().unwrap().len(), 16);
        assert_eq!(source.next_block().await.unwrap(), Some(Bytes::new()));
        assert_eq!(source.next_block().await.unwrap(), None);
    }
}
