//! Trigger delay planning
//!
//! Propagation time is the wire latency for the master and its direct agents. Deeper
//! devices accumulate their parent's propagation time plus the high-speed start latency.
//! Every device is delayed by `p_max - propagation_time` so that all of them start recording
//! at the same instant.

use contracts::{ContractError, DelayLimits, DeviceTiming, LayoutTree, TimingPlan, WalkEvent};
use tracing::debug;

/// Compute propagation time and trigger delay of every layout device
///
/// # Errors
/// Returns a configuration error when the largest delay exceeds the hardware ceiling or
/// a propagation time does not fit in 64 bits
pub fn plan(tree: &LayoutTree, limits: &DelayLimits) -> Result<TimingPlan, ContractError> {
    let mut propagation = vec![0u64; tree.len()];

    for event in tree.walk() {
        let WalkEvent::Enter(id) = event else {
            continue;
        };
        let node = tree.node(id);
        propagation[id] = match (node.depth, node.parent) {
            (depth, Some(parent)) if depth >= 2 => propagation[parent]
                .checked_add(node.wire_latency)
                .and_then(|p| p.checked_add(limits.hs_start_latency))
                .ok_or_else(|| overflow(&node.device))?,
            _ => node.wire_latency,
        };
    }

    let p_max = propagation.iter().copied().max().unwrap_or(0);
    let in_dead_zone = propagation
        .iter()
        .map(|p| p_max - p)
        .any(|delay| delay > 0 && delay < limits.min_delay);
    let shift = if in_dead_zone { limits.min_delay } else { 0 };

    let mut timing = TimingPlan {
        p_max,
        shifted: in_dead_zone,
        devices: Default::default(),
    };
    for (node, &propagation_time) in tree.nodes().iter().zip(&propagation) {
        let trigger_delay = (p_max - propagation_time)
            .checked_add(shift)
            .ok_or_else(|| overflow(&node.device))?;
        debug!(
            device = %node.device,
            depth = node.depth,
            propagation_time,
            trigger_delay,
            "planned trigger delay"
        );
        timing.devices.insert(
            node.device.clone(),
            DeviceTiming {
                depth: node.depth,
                propagation_time,
                trigger_delay,
            },
        );
    }

    let max_delay = timing.max_delay();
    if max_delay > limits.max_delay {
        return Err(ContractError::config(format!(
            "trigger delay {max_delay} ps exceeds the maximum applicable delay of {} ps, \
             reduce the layout depth or the wire lengths",
            limits.max_delay
        )));
    }
    Ok(timing)
}

fn overflow(device: &str) -> ContractError {
    ContractError::config(format!(
        "propagation time of device '{device}' overflows, check the wire latencies"
    ))
}
