//! Per-channel block buffer
//!
//! Written by exactly one receiver (append) and read by the merge worker (take). Slot
//! `i` holds the block of message index `i`. Indices stay stable for the whole
//! acquisition while consumed slots at the front are dropped.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Slots {
    /// Slot of index `base + i`, `None` once consumed
    slots: VecDeque<Option<Bytes>>,
    /// Message index of the front slot; every index below it is consumed
    base: usize,
    buffered_bytes: usize,
}

impl Slots {
    fn get_mut(&mut self, index: usize) -> Option<&mut Option<Bytes>> {
        let offset = index.checked_sub(self.base)?;
        self.slots.get_mut(offset)
    }

    fn received(&self) -> usize {
        self.base + self.slots.len()
    }

    /// Drop consumed slots from the front
    fn trim(&mut self) {
        while matches!(self.slots.front(), Some(None)) {
            self.slots.pop_front();
            self.base += 1;
        }
    }
}

/// Blocks of one streamed channel, indexed by message index
#[derive(Debug)]
pub struct ChannelBuffer {
    channel: u8,
    inner: Mutex<Slots>,
}

impl ChannelBuffer {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            inner: Mutex::new(Slots::default()),
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Append the next block, returning its message index and the buffered size
    pub fn push(&self, block: Bytes) -> (usize, usize) {
        let mut inner = self.inner.lock();
        inner.buffered_bytes += block.len();
        inner.slots.push_back(Some(block));
        (inner.received() - 1, inner.buffered_bytes)
    }

    /// Whether the block of `index` has been received and not consumed yet
    pub fn is_ready(&self, index: usize) -> bool {
        matches!(self.inner.lock().get_mut(index), Some(Some(_)))
    }

    /// Consume the block of `index`
    pub fn take(&self, index: usize) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let block = inner.get_mut(index)?.take()?;
        inner.buffered_bytes -= block.len();
        inner.trim();
        Some(block)
    }

    /// Release every block still held below `index`, returning their indices
    pub fn release_before(&self, index: usize) -> Vec<usize> {
        let mut inner = self.inner.lock();
        let mut released = Vec::new();
        while inner.base < index {
            let Some(slot) = inner.slots.pop_front() else {
                break;
            };
            if let Some(block) = slot {
                inner.buffered_bytes -= block.len();
                released.push(inner.base);
            }
            inner.base += 1;
        }
        inner.trim();
        released
    }

    /// Number of blocks received so far
    pub fn received(&self) -> usize {
        self.inner.lock().received()
    }

    /// Bytes received and not consumed yet
    pub fn buffered_bytes(&self) -> usize {
        self.inner.lock().buffered_bytes
    }

    /// Slots currently held, consumed ones included until the front is trimmed
    pub fn held_slots(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Whether any block at or above `index` is still held
    pub fn has_pending_from(&self, index: usize) -> bool {
        let inner = self.inner.lock();
        let skip = index.saturating_sub(inner.base);
        inner.slots.iter().skip(skip).any(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_take() {
        let buffer = ChannelBuffer::new(2);
        assert!(!buffer.is_ready(0));

        assert_eq!(buffer.push(Bytes::from_static(&[0; 16])), (0, 16));
        assert_eq!(buffer.push(Bytes::from_static(&[0; 8])), (1, 24));
        assert!(buffer.is_ready(0));
        assert!(buffer.is_ready(1));

        assert_eq!(buffer.take(0).map(|b| b.len()), Some(16));
        assert!(!buffer.is_ready(0));
        assert_eq!(buffer.take(0), None);
        assert_eq!(buffer.buffered_bytes(), 8);
        assert_eq!(buffer.received(), 2);
    }

    #[test]
    fn test_take_out_of_range() {
        let buffer = ChannelBuffer::new(1);
        assert_eq!(buffer.take(3), None);
        assert!(!buffer.has_pending_from(0));
    }

    #[test]
    fn test_release_before() {
        let buffer = ChannelBuffer::new(1);
        for _ in 0..4 {
            buffer.push(Bytes::from_static(&[0; 8]));
        }
        buffer.take(1);

        assert_eq!(buffer.release_before(3), vec![0, 2]);
        assert!(buffer.release_before(3).is_empty());
        assert_eq!(buffer.buffered_bytes(), 8);
        assert!(buffer.has_pending_from(3));
        assert!(!buffer.has_pending_from(4));
        assert_eq!(buffer.held_slots(), 1);
    }

    #[test]
    fn test_consumed_slots_are_dropped() {
        let buffer = ChannelBuffer::new(1);
        for i in 0..1000 {
            buffer.push(Bytes::from_static(&[0; 8]));
            assert_eq!(buffer.take(i).map(|b| b.len()), Some(8));
        }
        assert_eq!(buffer.held_slots(), 0);
        assert_eq!(buffer.received(), 1000);

        // a hole keeps later slots until it is consumed
        assert_eq!(buffer.push(Bytes::from_static(&[0; 8])).0, 1000);
        assert_eq!(buffer.push(Bytes::from_static(&[0; 8])).0, 1001);
        buffer.take(1001);
        assert_eq!(buffer.held_slots(), 2);
        assert!(buffer.is_ready(1000));
        assert!(!buffer.is_ready(999));
        buffer.take(1000);
        assert_eq!(buffer.held_slots(), 0);
        assert_eq!(buffer.release_before(1002), Vec::<usize>::new());
    }
}
