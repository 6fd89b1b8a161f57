//! AcquisitionSetup - Config Loader output

use serde::{Deserialize, Serialize};

use crate::{DeviceSpec, Devices, LayoutNode, LayoutTree, TimingPlan};

/// Acquisition description as written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupDocument {
    /// Use the high-resolution input mode on every device
    #[serde(default)]
    pub high_resolution: bool,

    pub devices: Devices,

    /// Trigger distribution tree, rooted at the master
    pub layout: LayoutNode,
}

/// Validated and planned setup
#[derive(Debug, Clone)]
pub struct AcquisitionSetup {
    /// Devices participating in the layout
    pub devices: Devices,
    pub layout: LayoutTree,
    pub high_resolution: bool,
    pub timing: TimingPlan,
    /// Non-fatal findings of validation
    pub warnings: Vec<String>,
}

impl AcquisitionSetup {
    /// Name of the master device
    pub fn master(&self) -> &str {
        &self.layout.root().device
    }

    pub fn device(&self, name: &str) -> Option<&DeviceSpec> {
        self.devices.get(name)
    }
}
