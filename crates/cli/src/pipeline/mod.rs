//! Acquisition orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{Orchestrator, RunPlan};
pub use stats::{RunRecord, RunStats};
