//! # Acquisition
//!
//! Acquisition lifecycle module.
//!
//! Responsibilities:
//! - Arm every device, open one capture session per raw acquisition and start the master
//! - Wait for the bulk-transfer service to drain, then stop and close the sessions
//! - Report data loss and export histograms
//! - Run the synchronized streaming session of a single device

pub mod controller;
pub mod files;
pub mod histogram;
pub mod report;
pub mod session;
pub mod stream;

pub use controller::{
    prepare_output_dir, AcquisitionController, AcquisitionState, DEFAULT_SETTLE_TIME,
};
pub use files::{histogram_filename, raw_filename};
pub use histogram::Histogram;
pub use report::{AcquisitionReport, DataLoss};
pub use session::{SessionTable, WaitPolicy};
pub use stream::{
    run_sync_stream, StreamOptions, StreamOutcome, DEFAULT_DEAD_TIME, DEFAULT_SUB_DURATION,
};
