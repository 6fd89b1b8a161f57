//! # Contracts
//!
//! Shared interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Units
//! - Latencies, delays and timestamps are integer picoseconds (`u64`)
//! - Channel numbers are 1-based

mod device;
mod error;
mod layout;
mod setup;
mod stream;
mod timing;
mod transport;

pub use device::*;
pub use error::*;
pub use layout::*;
pub use setup::*;
pub use stream::*;
pub use timing::*;
pub use transport::*;
