//! Trigger timing - propagation times and trigger delays per device
//!
//! All values are integer picoseconds.

use std::collections::BTreeMap;

use serde::Serialize;

/// Extra latency of start inputs below the second tier (high-speed mode)
pub const HS_START_LATENCY_PS: u64 = 8_000;

/// Smallest non-zero delay the record trigger can apply
pub const MIN_TRIGGER_DELAY_PS: u64 = 12_000;

/// Largest delay the record trigger can apply
pub const MAX_TRIGGER_DELAY_PS: u64 = 1_000_000_000;

/// Hardware delay limits used by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayLimits {
    pub hs_start_latency: u64,
    pub min_delay: u64,
    pub max_delay: u64,
}

impl Default for DelayLimits {
    fn default() -> Self {
        Self {
            hs_start_latency: HS_START_LATENCY_PS,
            min_delay: MIN_TRIGGER_DELAY_PS,
            max_delay: MAX_TRIGGER_DELAY_PS,
        }
    }
}

/// Planned timing of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceTiming {
    pub depth: usize,
    /// Time for the shared trigger to reach the device
    pub propagation_time: u64,
    /// Delay applied before the record generator starts
    pub trigger_delay: u64,
}

/// Result of delay planning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimingPlan {
    /// Largest propagation time over the layout
    pub p_max: u64,
    /// Whether every delay was shifted out of the dead zone
    pub shifted: bool,
    pub devices: BTreeMap<String, DeviceTiming>,
}

impl TimingPlan {
    pub fn get(&self, device: &str) -> Option<&DeviceTiming> {
        self.devices.get(device)
    }

    /// Trigger delay of a device, 0 when unplanned
    pub fn trigger_delay(&self, device: &str) -> u64 {
        self.devices.get(device).map_or(0, |t| t.trigger_delay)
    }

    /// Largest trigger delay over all devices
    pub fn max_delay(&self) -> u64 {
        self.devices
            .values()
            .map(|t| t.trigger_delay)
            .max()
            .unwrap_or(0)
    }
}
