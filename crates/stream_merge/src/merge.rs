//! Merge of one message index across channels

use bytes::Bytes;
use contracts::{ContractError, MergedRecord, TIMESTAMP_WIDTH};

/// Decode little-endian timestamps of one block
pub fn decode_block(channel: u8, index: usize, block: &[u8]) -> Result<Vec<u64>, ContractError> {
    if block.len() % TIMESTAMP_WIDTH != 0 {
        return Err(ContractError::acquisition(format!(
            "block #{index} of channel {channel} has {} bytes, not a multiple of {TIMESTAMP_WIDTH}",
            block.len()
        )));
    }
    Ok(block
        .chunks_exact(TIMESTAMP_WIDTH)
        .map(|chunk| {
            let mut raw = [0u8; TIMESTAMP_WIDTH];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        })
        .collect())
}

/// Merge the blocks of message `index`
///
/// Each timestamp is relative to the start of its sub-acquisition; it is moved to the
/// global clock by adding `index * period`. Records are concatenated in the order of
/// `blocks` and stable-sorted by global timestamp.
pub fn merge_index(
    index: usize,
    period: u64,
    blocks: &[(u8, Bytes)],
) -> Result<Vec<MergedRecord>, ContractError> {
    let offset = (index as u64).checked_mul(period).ok_or_else(|| {
        ContractError::acquisition(format!("message index {index} overflows the global clock"))
    })?;

    let mut records = Vec::with_capacity(
        blocks
            .iter()
            .map(|(_, block)| block.len() / TIMESTAMP_WIDTH)
            .sum(),
    );
    for (channel, block) in blocks {
        for local in decode_block(*channel, index, block)? {
            let timestamp = local.checked_add(offset).ok_or_else(|| {
                ContractError::acquisition(format!(
                    "timestamp {local} of channel {channel} overflows the global clock at index {index}"
                ))
            })?;
            records.push(MergedRecord::new(*channel, timestamp));
        }
    }
    records.sort_by_key(|record| record.timestamp);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ErrorKind;

    fn encode(values: &[u64]) -> Bytes {
        values
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<u8>>()
            .into()
    }

    fn pairs(records: &[MergedRecord]) -> Vec<(u8, u64)> {
        records.iter().map(|r| (r.channel, r.timestamp)).collect()
    }

    #[test]
    fn test_merge_first_index() {
        let blocks = [(1, encode(&[5, 1, 9])), (2, encode(&[3]))];
        let merged = merge_index(0, 100, &blocks).unwrap();
        assert_eq!(pairs(&merged), vec![(1, 1), (2, 3), (1, 5), (1, 9)]);
    }

    #[test]
    fn test_merge_offsets_by_period() {
        let blocks = [(1, encode(&[2])), (2, encode(&[4, 1]))];
        let merged = merge_index(1, 100, &blocks).unwrap();
        assert_eq!(pairs(&merged), vec![(2, 101), (1, 102), (2, 104)]);
    }

    #[test]
    fn test_merge_is_stable_on_ties() {
        let blocks = [(3, encode(&[7, 7])), (1, encode(&[7]))];
        let merged = merge_index(2, 10, &blocks).unwrap();
        assert_eq!(pairs(&merged), vec![(3, 27), (3, 27), (1, 27)]);
    }

    #[test]
    fn test_empty_blocks() {
        let blocks = [(1, Bytes::new()), (2, Bytes::new())];
        assert!(merge_index(4, 100, &blocks).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_block_rejected() {
        let blocks = [(4, Bytes::from_static(&[1, 2, 3]))];
        let err = merge_index(7, 100, &blocks).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Acquisition);
        let text = err.to_string();
        assert!(text.contains("channel 4"), "got: {text}");
        assert!(text.contains("#7"), "got: {text}");
    }

    #[test]
    fn test_global_clock_overflow() {
        let blocks = [(1, encode(&[u64::MAX]))];
        assert!(merge_index(1, 1, &blocks).is_err());
    }
}
