//! # Stream Merge
//!
//! Merges independently streamed referenceless timestamp channels into one globally
//! ordered `channel;timestamp` sequence.
//!
//! Reception and merging are decoupled:
//! - one receiver task per channel appends raw blocks to its [`ChannelBuffer`]
//! - a single worker merges message index `i` once every channel delivered it,
//!   re-globalizing timestamps by `i * period`, and owns the output sink
//!
//! ## Example
//!
//! ```ignore
//! let sources = vec![ZmqBlockSource::connect("127.0.0.1", 1).await?];
//! let sink = MergedFileSink::create("out/merged.txt")?;
//! let handle = MergeHandle::spawn(MergeConfig::new(period), sources, sink)?;
//! // ... stream ...
//! let stats = handle.shutdown().await?;
//! ```

pub mod buffer;
pub mod engine;
pub mod merge;
mod receiver;
pub mod sink;
pub mod source;

pub use buffer::ChannelBuffer;
pub use engine::{MergeConfig, MergeHandle, MergeStats, StallPolicy, DEFAULT_DRAIN_TIMEOUT};
pub use merge::{decode_block, merge_index};
pub use sink::{MemorySink, MergedFileSink};
pub use source::{stream_port, MemorySource, ZmqBlockSource};
