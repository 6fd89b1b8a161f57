//! # Configurator
//!
//! Device configuration module.
//!
//! Walks the layout tree and programs each device according to its role:
//! - the master generates and distributes the acquisition signal
//! - agents forward it to their own agents
//! - every device delays it by its planned trigger delay before recording

pub mod commands;
mod configure;

pub use commands::{Resolution, ACQU_SIGNAL_GEN};
pub use configure::configure;
