//! Channel receiver task
//!
//! Only appends to its buffer; all decoding happens in the merge worker so reception is
//! never slowed down by merging.

use std::sync::Arc;

use contracts::{BlockSource, ContractError, TIMESTAMP_WIDTH};
use observability::format_size;
use tokio::sync::{watch, Notify};
use tracing::{debug, instrument, warn};

use crate::buffer::ChannelBuffer;

/// Receive blocks until the source ends or `stop` is set, returning the number of
/// blocks received
#[instrument(name = "stream_receiver", skip_all, fields(channel = buffer.channel()))]
pub(crate) async fn receive<S: BlockSource>(
    mut source: S,
    buffer: Arc<ChannelBuffer>,
    wake: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) -> Result<usize, ContractError> {
    let channel = buffer.channel();
    debug!(channel, "receiver started");

    let result = loop {
        let next = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => {
                debug!(channel, "receiver stopped before the end of its stream");
                break Ok(buffer.received());
            }
            next = source.next_block() => next,
        };
        match next {
            Ok(Some(block)) => {
                let bytes = block.len();
                let (index, buffered) = buffer.push(block);
                debug!(
                    channel,
                    "buffering {} new timestamps from message #{} (buffered: {})",
                    bytes / TIMESTAMP_WIDTH,
                    index,
                    format_size(buffered)
                );
                observability::record_block_received(channel, bytes);
                observability::record_buffered_bytes(channel, buffered);
                wake.notify_one();
            }
            Ok(None) => break Ok(buffer.received()),
            Err(e) => {
                warn!(channel, error = %e, "receiver stopped on error");
                break Err(e);
            }
        }
    };

    wake.notify_one();
    debug!(channel, received = buffer.received(), "receiver stopped");
    result
}
