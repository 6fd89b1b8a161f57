//! Layout configuration walk
//!
//! On entering a node the trigger chain and the role wiring are programmed; agents are
//! then configured; on leaving the node its measurement channels and free-form commands
//! are applied.

use contracts::{AcquisitionSetup, Channel, ContractError, LayoutTree, Transport, WalkEvent};
use connector::Connections;
use tracing::{debug, info, instrument};

use crate::commands::{self, Resolution};

/// Program every device of the layout
///
/// # Errors
/// The first command rejected by an instrument
#[instrument(name = "configure", skip_all, fields(devices = setup.layout.len(), high_resolution = setup.high_resolution))]
pub async fn configure<T: Transport>(
    setup: &AcquisitionSetup,
    connections: &mut Connections<T>,
) -> Result<(), ContractError> {
    let resolution = Resolution::from_flag(setup.high_resolution);

    for event in setup.layout.walk() {
        match event {
            WalkEvent::Enter(id) => {
                let node = setup.layout.node(id);
                let delay = setup.timing.trigger_delay(&node.device);
                let agent_outputs: Vec<Channel> =
                    setup.layout.agents(id).map(|(output, _)| output).collect();

                let mut batch = commands::trigger_chain(delay);
                if node.is_root() {
                    batch.extend(commands::master_distribution(&agent_outputs));
                } else {
                    batch.extend(commands::agent_forwarding(&agent_outputs));
                }
                debug!(device = %node.device, depth = node.depth, trigger_delay = delay, "wiring trigger path");
                send_all(connections, &node.device, &batch).await?;
            }
            WalkEvent::Leave(id) => {
                let node = setup.layout.node(id);
                let spec = setup.device(&node.device).ok_or_else(|| {
                    ContractError::config_property(
                        format!("layout references undefined device '{}'", node.device),
                        node.path.join("device"),
                    )
                })?;
                let mut batch = commands::acquisitions(spec, resolution);
                batch.extend(spec.config.iter().cloned());
                send_all(connections, &node.device, &batch).await?;
                info!(
                    device = %node.device,
                    role = if id == LayoutTree::ROOT { "master" } else { "agent" },
                    "device configured"
                );
            }
        }
    }
    Ok(())
}

async fn send_all<T: Transport>(
    connections: &mut Connections<T>,
    device: &str,
    batch: &[String],
) -> Result<(), ContractError> {
    let link = connections.get_mut(device)?;
    for command in batch {
        link.scpi.exec(command).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};
    use connector::{CommandLog, DataLinkClient, DeviceLink, MockTransport, ScpiClient};
    use contracts::ErrorKind;

    const SETUP: &str = r#"{
        "devices": {
            "m": { "ip": "10.0.0.1", "inputs": { "1": {} },
                   "timestamps": { "acquisitions": [[0, 1]] }, "config": ["CUSTOM:M"] },
            "a": { "ip": "10.0.0.2", "inputs": { "2": {} },
                   "histograms": { "acquisitions": [[0, 2]] } },
            "b": { "ip": "10.0.0.3" }
        },
        "layout": {
            "device": "m",
            "agents": { "2": {
                "device": "a", "wire_latency": 20000,
                "agents": { "3": { "device": "b", "wire_latency": 30000 } }
            } }
        }
    }"#;

    fn connections(
        setup: &AcquisitionSetup,
        log: &CommandLog,
        reject: Option<(&str, &str)>,
    ) -> Connections<MockTransport> {
        let mut connections = Connections::new();
        for (name, spec) in &setup.devices {
            let mut scpi = MockTransport::with_log(name.clone(), log.clone());
            if let Some((device, command)) = reject {
                if device == name.as_str() {
                    scpi = scpi.respond(command, "SCPI_ERR_-100 Command error");
                }
            }
            let dlt = MockTransport::new(format!("{name}-dlt"));
            connections.insert(
                name.clone(),
                DeviceLink::new(
                    ScpiClient::new(scpi, spec.ip.clone()),
                    DataLinkClient::new(dlt, spec.ip.clone()),
                ),
            );
        }
        connections
    }

    fn device_order(log: &CommandLog) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for (device, _) in log.entries() {
            if order.last() != Some(&device) {
                order.push(device);
            }
        }
        order
    }

    #[tokio::test]
    async fn test_configure_order_and_roles() {
        let setup = ConfigLoader::load_from_str(SETUP, ConfigFormat::Json).unwrap();
        let log = CommandLog::new();
        let mut conns = connections(&setup, &log, None);

        configure(&setup, &mut conns).await.unwrap();

        // trigger wiring outward, measurement channels inward
        assert_eq!(device_order(&log), vec!["m", "a", "b", "a", "m"]);

        let master = log.commands_for("m");
        assert!(master.contains(&"DEVIce:SYNC INT".to_string()));
        assert!(master.contains(&"OUTP2:ENAB ON;LINK TSCO1".to_string()));
        assert_eq!(master.last().unwrap(), "CUSTOM:M");

        let agent = log.commands_for("a");
        assert!(agent.contains(&"DEVIce:SYNC EXT".to_string()));
        assert!(agent.contains(&"OUTP3:ENAB ON;LINK TSCO3".to_string()));

        // b is at depth 2: propagation 20_000 + 30_000 + 8_000 = p_max, delay 0
        let leaf = log.commands_for("b");
        assert!(leaf[2].contains("TRIG:DELA 0;"), "got: {}", leaf[2]);
        // master delay = p_max
        assert!(master[2].contains("TRIG:DELA 58000;"), "got: {}", master[2]);
    }

    #[tokio::test]
    async fn test_first_rejection_stops_configuration() {
        let setup = ConfigLoader::load_from_str(SETUP, ConfigFormat::Json).unwrap();
        let log = CommandLog::new();
        let mut conns = connections(&setup, &log, Some(("a", "DEVIce:SYNC EXT")));

        let err = configure(&setup, &mut conns).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Command);
        assert!(err.to_string().contains("10.0.0.2"), "got: {err}");
        assert!(log.commands_for("b").is_empty());
    }
}
