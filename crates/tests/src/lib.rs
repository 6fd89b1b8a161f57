//! # Integration Tests
//!
//! Cross-crate flows driven by scripted transports.
//!
//! Covers:
//! - Loading, planning and configuring a device tree
//! - A complete acquisition from configuration to exported histograms
//! - A synchronized stream merged into a file

#[cfg(test)]
mod fixtures {
    use config_loader::{ConfigFormat, ConfigLoader};
    use connector::{CommandLog, Connections, DataLinkClient, DeviceLink, MockTransport, ScpiClient};
    use contracts::AcquisitionSetup;

    /// Master `m`, agent `a` on output 2, agent `b` behind `a` on output 3
    pub const SETUP: &str = r#"{
        "high_resolution": true,
        "devices": {
            "m": { "ip": "10.0.0.1", "inputs": { "1": {}, "2": {} },
                   "timestamps": { "acquisitions": [[1, 2]] } },
            "a": { "ip": "10.0.0.2", "inputs": { "4": { "threshold": 0.3 } },
                   "histograms": { "acquisitions": [[0, 4]], "bin_width": 20 } },
            "b": { "ip": "10.0.0.3", "inputs": { "1": {} },
                   "timestamps": { "acquisitions": [[0, 1]], "format": "bin" },
                   "config": ["INPU1:COUN:INTE 1000"] }
        },
        "layout": { "device": "m", "agents": {
            "2": { "device": "a", "wire_latency": 40000,
                   "agents": { "3": { "device": "b", "wire_latency": 25000 } } }
        } }
    }"#;

    pub fn setup() -> AcquisitionSetup {
        ConfigLoader::load_from_str(SETUP, ConfigFormat::Json).unwrap()
    }

    pub fn connections(setup: &AcquisitionSetup, log: &CommandLog) -> Connections<MockTransport> {
        let mut connections = Connections::new();
        for (name, spec) in &setup.devices {
            let scpi = MockTransport::with_log(name.clone(), log.clone())
                .respond("INPUt", "0")
                .respond("RAW1:ERRORS?", "0")
                .respond("HIST1:DATA?", "[0,7,3,0]")
                .respond("HIST1:MIN?", "0TB")
                .respond("HIST1:BWID?", "20TB");
            let id = name.clone();
            let dlt = MockTransport::with_log(format!("{name}-dlt"), log.clone())
                .respond_with("start-save", move |_| format!(r#"{{"id": "{id}-1"}}"#))
                .respond(
                    "status",
                    r#"{"acquisitions_count": 12, "inactivity": 0.2, "errors": []}"#,
                )
                .respond("stop", r#"{"status": {"errors": []}}"#)
                .respond("list", "[]");
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
}

#[cfg(test)]
mod configuration_tests {
    use super::fixtures;
    use connector::CommandLog;

    #[tokio::test]
    async fn test_every_device_gets_its_planned_delay() {
        let setup = fixtures::setup();
        let log = CommandLog::new();
        let mut connections = fixtures::connections(&setup, &log);

        configurator::configure(&setup, &mut connections).await.unwrap();

        for name in ["m", "a", "b"] {
            let delay = setup.timing.trigger_delay(name);
            let expected = format!("REC:ENAB OFF;TRIG:DELA {delay};");
            assert!(
                log.commands_for(name).iter().any(|c| c.starts_with(&expected)),
                "{name} did not receive a delay of {delay} ps"
            );
        }
        // deeper devices wait less
        assert!(setup.timing.trigger_delay("m") > setup.timing.trigger_delay("a"));
        assert!(setup.timing.trigger_delay("a") > setup.timing.trigger_delay("b"));
    }

    #[tokio::test]
    async fn test_clock_roles_and_custom_commands_last() {
        let setup = fixtures::setup();
        let log = CommandLog::new();
        let mut connections = fixtures::connections(&setup, &log);

        configurator::configure(&setup, &mut connections).await.unwrap();

        assert!(log.commands_for("m").contains(&"DEVIce:SYNC INT".to_string()));
        assert!(log.commands_for("a").contains(&"DEVIce:SYNC EXT".to_string()));
        assert!(log.commands_for("b").contains(&"DEVIce:SYNC EXT".to_string()));
        assert_eq!(
            log.commands_for("b").last().map(String::as_str),
            Some("INPU1:COUN:INTE 1000")
        );

        // agents are finished before their parent
        let order: Vec<String> = log.entries().into_iter().map(|(device, _)| device).collect();
        let last = |device: &str| order.iter().rposition(|d| d == device).unwrap();
        assert!(last("b") < last("a"));
        assert!(last("a") < last("m"));
    }
}

#[cfg(test)]
mod acquisition_tests {
    use std::time::Duration;

    use super::fixtures;
    use acquisition::{AcquisitionController, AcquisitionState};
    use connector::CommandLog;

    #[tokio::test(start_paused = true)]
    async fn test_configure_then_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("run");
        let setup = fixtures::setup();
        let log = CommandLog::new();
        let mut connections = fixtures::connections(&setup, &log);
        configurator::configure(&setup, &mut connections).await.unwrap();
        log.clear();

        let mut controller = AcquisitionController::new(setup, connections);
        let report = controller
            .run(&output, Duration::from_secs(2))
            .await
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.data_loss);
        assert_eq!(controller.state(), AcquisitionState::Idle);
        assert!(controller.sessions().is_empty());

        // every device armed before the master fires the start signal
        let entries = log.entries();
        let play = entries
            .iter()
            .position(|(device, command)| device == "m" && command == "GEN1:PLAY")
            .unwrap();
        for name in ["m", "a", "b"] {
            let armed = entries
                .iter()
                .position(|(device, command)| device == name && command.ends_with("TRIG:ARM"))
                .unwrap();
            assert!(armed < play, "{name} armed after the start signal");
        }
        assert!(entries.contains(&("m".to_string(), "REC:DUR 2000000000000;TRIG:ARM".to_string())));

        let histogram = output.join("histogram_a_0-4.csv");
        assert_eq!(std::fs::read_to_string(&histogram).unwrap(), "0;7;3;0");
        assert!(report.files.contains(&histogram));
        assert!(report.files.contains(&output.join("timestamps_m_1-2.txt")));
        assert!(report.files.contains(&output.join("timestamps_b_0-1.bin")));

        let stops: Vec<String> = log
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("stop "))
            .collect();
        assert_eq!(stops, vec!["stop b-1".to_string(), "stop m-1".to_string()]);
    }
}

#[cfg(test)]
mod stream_tests {
    use std::time::Duration;

    use acquisition::{run_sync_stream, StreamOptions};
    use connector::{CommandLog, DataLinkClient, DeviceLink, MockTransport, ScpiClient};
    use contracts::ContractError;
    use stream_merge::{MemorySource, MergedFileSink};

    #[tokio::test(start_paused = true)]
    async fn test_stream_merged_into_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged").join("stream.txt");
        let log = CommandLog::new();
        let scpi = MockTransport::with_log("tc", log.clone()).respond("RAW", "0");
        let dlt = MockTransport::with_log("dlt", log.clone())
            .respond_with("start-stream", |command| {
                let channel = command.split_whitespace().nth(4).unwrap_or("0").to_string();
                format!(r#"{{"id": {channel}}}"#)
            })
            .respond(
                "status",
                r#"{"acquisitions_count": 0, "inactivity": 5.0, "errors": []}"#,
            )
            .respond("stop", r#"{"status": {"errors": []}}"#)
            .respond("list", "[]");
        let mut link = DeviceLink::new(
            ScpiClient::new(scpi, "10.0.0.9"),
            DataLinkClient::new(dlt, "10.0.0.9"),
        );

        let mut options = StreamOptions::new("10.0.0.9", &path);
        options.channels = vec![1, 2, 3];
        options.duration = Duration::from_secs(1);
        options.sub_duration = Duration::from_nanos(600);

        let outcome = run_sync_stream(
            &mut link,
            &options,
            |channel| async move {
                let source = match channel {
                    1 => MemorySource::new(1).block(&[10, 500]).block(&[20]),
                    2 => MemorySource::new(2)
                        .block_after(Duration::from_millis(300), &[15])
                        .block(&[]),
                    _ => MemorySource::new(3).block(&[]).block(&[5, 999_000]),
                };
                Ok::<_, ContractError>(source)
            },
            MergedFileSink::create(&path).unwrap(),
        )
        .await
        .unwrap();

        assert!(outcome.is_clean());
        assert_eq!(outcome.merge.indices, 2);
        assert_eq!(outcome.merged_timestamps, 6);

        // period = 600 ns + 400 ns of dead time
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "1;10",
                "2;15",
                "1;500",
                "3;1000005",
                "1;1000020",
                "3;1999000",
            ]
        );
    }
}
