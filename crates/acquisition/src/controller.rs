//! Acquisition lifecycle: begin, wait, end, cleanup
//!
//! `Idle -> Armed -> Running -> Draining -> Idle`, with `Faulted` reachable from the
//! three active states. Sessions opened on the bulk-transfer service are kept in the
//! controller's [`SessionTable`]; the device specs are never touched.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use configurator::ACQU_SIGNAL_GEN;
use connector::{Connections, SaveRequest};
use contracts::{AcquisitionSetup, ContractError, Transport};
use tracing::{debug, info, instrument, warn};

use crate::files::{histogram_filename, raw_filename};
use crate::histogram::Histogram;
use crate::report::{hires_errors, query_failure, raw_errors, AcquisitionReport, DataLoss};
use crate::session::{SessionTable, WaitPolicy};

/// Time left to the bulk-transfer service to receive in-flight data
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(1);

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Armed,
    Running,
    Draining,
    Faulted,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Runs acquisitions on a configured set of devices
pub struct AcquisitionController<T> {
    setup: AcquisitionSetup,
    connections: Connections<T>,
    state: AcquisitionState,
    sessions: SessionTable,
    wait_policy: WaitPolicy,
    settle_time: Duration,
}

impl<T: Transport> AcquisitionController<T> {
    pub fn new(setup: AcquisitionSetup, connections: Connections<T>) -> Self {
        Self {
            setup,
            connections,
            state: AcquisitionState::Idle,
            sessions: SessionTable::new(),
            wait_policy: WaitPolicy::default(),
            settle_time: DEFAULT_SETTLE_TIME,
        }
    }

    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn setup(&self) -> &AcquisitionSetup {
        &self.setup
    }

    pub fn connections_mut(&mut self) -> &mut Connections<T> {
        &mut self.connections
    }

    pub fn into_connections(self) -> Connections<T> {
        self.connections
    }

    /// Run one complete acquisition into `output_dir`
    ///
    /// The directory is created when missing. A failure while starting or waiting
    /// closes every open capture session before the error is returned.
    #[instrument(name = "acquisition_run", skip(self), fields(output_dir = %output_dir.display()))]
    pub async fn run(
        &mut self,
        output_dir: &Path,
        duration: Duration,
    ) -> Result<AcquisitionReport, ContractError> {
        prepare_output_dir(output_dir)?;

        let started = match self.begin(output_dir, duration).await {
            Ok(()) => self.wait(duration).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            self.cleanup().await;
            return Err(e);
        }
        self.end(Some(output_dir)).await
    }

    /// Stop a running acquisition (interrupt path)
    #[instrument(name = "acquisition_stop", skip(self), fields(state = %self.state))]
    pub async fn stop(
        &mut self,
        output_dir: Option<&Path>,
    ) -> Result<AcquisitionReport, ContractError> {
        match self.end(output_dir).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.cleanup().await;
                Err(e)
            }
        }
    }

    /// Arm every device, open the capture sessions and fire the start signal
    #[instrument(name = "acquisition_begin", skip(self), fields(devices = self.setup.devices.len()))]
    pub async fn begin(&mut self, output_dir: &Path, duration: Duration) -> Result<(), ContractError> {
        if !matches!(self.state, AcquisitionState::Idle | AcquisitionState::Faulted) {
            return Err(ContractError::acquisition(format!(
                "cannot begin an acquisition while {}",
                self.state
            )));
        }
        let result = self.begin_inner(output_dir, duration).await;
        self.settle_state(result, AcquisitionState::Running)
    }

    async fn begin_inner(&mut self, output_dir: &Path, duration: Duration) -> Result<(), ContractError> {
        let duration_ps = duration_ps(duration)?;
        self.sessions.clear();

        for (name, spec) in &self.setup.devices {
            let link = self.connections.get_mut(name)?;
            for input in spec.used_inputs() {
                link.scpi
                    .exec(&format!("INPUt{input}:HIREs:ERROr:CLEAr"))
                    .await?;
            }
            // Arm the record generator for the whole duration
            link.scpi
                .exec(&format!("REC:DUR {duration_ps};TRIG:ARM"))
                .await?;
        }
        self.state = AcquisitionState::Armed;

        for (name, spec) in &self.setup.devices {
            let link = self.connections.get_mut(name)?;
            for (index, _) in spec.histogram_acquisitions() {
                link.scpi.exec(&format!("HIST{index}:FLUSh")).await?;
            }
        }

        for (name, spec) in &self.setup.devices {
            let Some(timestamps) = spec.timestamps.as_ref() else {
                continue;
            };
            let link = self.connections.get_mut(name)?;
            for (index, pair) in spec.raw_acquisitions() {
                link.scpi
                    .exec(&format!("RAW{index}:ERRORS:CLEAR"))
                    .await?;

                let path = output_dir.join(raw_filename(name, &pair, timestamps.format));
                let id = link
                    .dlt
                    .start_save(&SaveRequest {
                        address: &spec.ip,
                        channel: index,
                        path: &path,
                        format: timestamps.format,
                        with_ref_index: timestamps.with_ref_index,
                    })
                    .await?;
                self.sessions.insert(name, index, id);

                link.scpi.exec(&format!("RAW{index}:SEND ON")).await?;
                info!(
                    device = %name,
                    "Record timestamps {} of {} in {}",
                    pair.label(),
                    name,
                    path.display()
                );
            }
            observability::record_acquisition_started(name);
        }

        info!(duration_ps, sessions = self.sessions.len(), "Start of acquisition");
        let master = self.setup.master().to_string();
        self.connections
            .get_mut(&master)?
            .scpi
            .exec(&format!("{ACQU_SIGNAL_GEN}:PLAY"))
            .await?;
        Ok(())
    }

    /// Sleep past the acquisition, then poll every session until it is settled
    #[instrument(name = "acquisition_wait", skip(self), fields(sessions = self.sessions.len()))]
    pub async fn wait(&mut self, duration: Duration) -> Result<(), ContractError> {
        if self.state != AcquisitionState::Running {
            return Err(ContractError::acquisition(format!(
                "cannot wait for an acquisition while {}",
                self.state
            )));
        }
        let result = self.wait_inner(duration).await;
        self.settle_state(result, AcquisitionState::Draining)
    }

    async fn wait_inner(&mut self, duration: Duration) -> Result<(), ContractError> {
        tokio::time::sleep(duration + self.wait_policy.guard).await;

        let mut pending = self.sessions.entries();
        let mut polls = 0;
        loop {
            let mut busy = Vec::with_capacity(pending.len());
            for (device, index, id) in pending {
                let status = self.connections.get_mut(&device)?.dlt.status(&id).await?;
                if self.wait_policy.is_settled(&status) {
                    debug!(device = %device, index, session = %id, "session settled");
                } else {
                    busy.push((device, index, id));
                }
            }
            pending = busy;
            if pending.is_empty() {
                return Ok(());
            }

            polls += 1;
            self.wait_policy.check_polls(polls, pending.len())?;
            debug!(pending = pending.len(), polls, "waiting for capture sessions");
            tokio::time::sleep(self.wait_policy.poll_interval).await;
        }
    }

    /// Stop recording, close the sessions and report data loss
    ///
    /// With an output directory the histograms are exported as well. Data loss is
    /// reported, never raised.
    #[instrument(name = "acquisition_end", skip(self), fields(state = %self.state))]
    pub async fn end(
        &mut self,
        output_dir: Option<&Path>,
    ) -> Result<AcquisitionReport, ContractError> {
        let result = self.end_inner(output_dir).await;
        self.settle_state(result, AcquisitionState::Idle)
    }

    async fn end_inner(
        &mut self,
        output_dir: Option<&Path>,
    ) -> Result<AcquisitionReport, ContractError> {
        for (name, spec) in &self.setup.devices {
            let link = self.connections.get_mut(name)?;
            link.scpi.exec("REC:STOP").await?;
            for (index, _) in spec.raw_acquisitions() {
                link.scpi.exec(&format!("RAW{index}:SEND OFF")).await?;
            }
        }

        // let the service receive the remaining timestamps
        tokio::time::sleep(self.settle_time).await;

        let mut report = AcquisitionReport::default();
        self.close_sessions(output_dir, &mut report).await?;
        if let Some(dir) = output_dir {
            self.export_histograms(dir, &mut report).await?;
        }

        for loss in &report.data_loss {
            loss.log();
        }
        info!(
            files = report.files.len(),
            data_loss = report.data_loss.len(),
            "End of acquisition"
        );
        Ok(report)
    }

    async fn close_sessions(
        &mut self,
        output_dir: Option<&Path>,
        report: &mut AcquisitionReport,
    ) -> Result<(), ContractError> {
        let high_resolution = self.setup.high_resolution;
        for (name, spec) in &self.setup.devices {
            let Some(timestamps) = spec.timestamps.as_ref() else {
                continue;
            };
            let link = self.connections.get_mut(name)?;
            for (index, pair) in spec.raw_acquisitions() {
                let Some(id) = self.sessions.get(name, index) else {
                    continue;
                };

                let mut errors: Vec<String> = match link.dlt.stop(id).await {
                    Ok(errors) => errors
                        .into_iter()
                        .map(|e| format!("DataLinkTarget error: {}", e.description))
                        .collect(),
                    Err(e) => vec![query_failure(&format!("stop {id}"), &e)],
                };
                if high_resolution {
                    errors.extend(hires_errors(&mut link.scpi, &pair).await);
                }
                errors.extend(raw_errors(&mut link.scpi, index).await);

                let file = raw_filename(name, &pair, timestamps.format);
                report
                    .files
                    .push(output_dir.map_or_else(|| PathBuf::from(&file), |dir| dir.join(&file)));
                if !errors.is_empty() {
                    report.data_loss.push(DataLoss {
                        device: name.clone(),
                        file,
                        errors,
                    });
                }
            }
        }
        self.sessions.clear();
        Ok(())
    }

    async fn export_histograms(
        &mut self,
        output_dir: &Path,
        report: &mut AcquisitionReport,
    ) -> Result<(), ContractError> {
        let high_resolution = self.setup.high_resolution;
        for (name, spec) in &self.setup.devices {
            let Some(histograms) = spec.histograms.as_ref() else {
                continue;
            };
            let link = self.connections.get_mut(name)?;
            for (index, pair) in spec.histogram_acquisitions() {
                let file = histogram_filename(name, &pair, histograms.format);
                let path = output_dir.join(&file);

                let mut errors = Vec::new();
                match Histogram::read(&mut link.scpi, index).await {
                    Ok(histogram) => {
                        info!(
                            device = %name,
                            "Save histogram {} of {} in {}",
                            pair.label(),
                            name,
                            path.display()
                        );
                        histogram.save(&path, histograms.format)?;
                        report.files.push(path);
                    }
                    Err(e) => {
                        warn!(device = %name, index, error = %e, "histogram read-back failed");
                        errors.push(query_failure(&format!("HIST{index}:DATA?"), &e));
                    }
                }
                if high_resolution {
                    errors.extend(hires_errors(&mut link.scpi, &pair).await);
                }
                if !errors.is_empty() {
                    report.data_loss.push(DataLoss {
                        device: name.clone(),
                        file,
                        errors,
                    });
                }
            }
        }
        Ok(())
    }

    /// Close every session the bulk-transfer services still know about
    ///
    /// Best effort: failures are logged and swallowed.
    #[instrument(name = "acquisition_cleanup", skip(self))]
    pub async fn cleanup(&mut self) {
        for (name, link) in self.connections.iter_mut() {
            let ids = match link.dlt.list().await {
                Ok(ids) => ids,
                Err(e) => {
                    debug!(device = %name, error = %e, "unable to list capture sessions");
                    continue;
                }
            };
            for id in ids {
                match link.dlt.stop(&id).await {
                    Ok(_) => debug!(device = %name, session = %id, "capture session closed"),
                    Err(e) => debug!(device = %name, session = %id, error = %e, "unable to close capture session"),
                }
            }
        }
        self.sessions.clear();
    }

    fn settle_state<R>(
        &mut self,
        result: Result<R, ContractError>,
        next: AcquisitionState,
    ) -> Result<R, ContractError> {
        self.state = if result.is_ok() {
            next
        } else {
            AcquisitionState::Faulted
        };
        result
    }
}

/// Create the output directory when missing
pub fn prepare_output_dir(output_dir: &Path) -> Result<(), ContractError> {
    if output_dir.is_dir() {
        return Ok(());
    }
    if output_dir.exists() {
        return Err(ContractError::acquisition(format!(
            "output path {} is not a directory",
            output_dir.display()
        )));
    }
    std::fs::create_dir_all(output_dir)?;
    Ok(())
}

fn duration_ps(duration: Duration) -> Result<u64, ContractError> {
    u64::try_from(duration.as_nanos() * 1_000).map_err(|_| {
        ContractError::acquisition(format!("acquisition duration {duration:?} is too long"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};
    use connector::{CommandLog, DataLinkClient, DeviceLink, MockTransport, ScpiClient};
    use contracts::ErrorKind;
    use tempfile::tempdir;

    const SETUP: &str = r#"{
        "high_resolution": true,
        "devices": {
            "m": { "ip": "10.0.0.1", "inputs": { "1": {}, "2": {} },
                   "timestamps": { "acquisitions": [[0, 1], [1, 2]] },
                   "histograms": { "acquisitions": [[1, 2]] } },
            "a": { "ip": "10.0.0.2", "inputs": { "3": {} },
                   "timestamps": { "acquisitions": [[0, 3]], "format": "bin" } }
        },
        "layout": { "device": "m", "agents": { "2": { "device": "a", "wire_latency": 20000 } } }
    }"#;

    struct Bench {
        log: CommandLog,
        controller: AcquisitionController<MockTransport>,
    }

    fn scpi_mock(name: &str, log: &CommandLog) -> MockTransport {
        MockTransport::with_log(name, log.clone())
            .respond("INPUt", "0")
            .respond("RAW", "")
            .respond("RAW1:ERRORS?", "0")
            .respond("RAW2:ERRORS?", "0")
            .respond("HIST1:DATA?", "[0,2,5]")
            .respond("HIST1:MIN?", "0TB")
            .respond("HIST1:BWID?", "100TB")
    }

    fn dlt_mock(name: &str, log: &CommandLog) -> MockTransport {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        MockTransport::with_log(format!("{name}-dlt"), log.clone())
            .respond_with("start-save", move |_| {
                let id = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                format!(r#"{{"id": {id}}}"#)
            })
            .respond(
                "status",
                r#"{"acquisitions_count": 0, "inactivity": 0.1, "errors": []}"#,
            )
            .respond("stop", r#"{"status": {"errors": []}}"#)
            .respond("list", "[]")
    }

    fn bench_with(
        customize: impl Fn(&str, MockTransport, MockTransport) -> (MockTransport, MockTransport),
    ) -> Bench {
        let setup = ConfigLoader::load_from_str(SETUP, ConfigFormat::Json).unwrap();
        let log = CommandLog::new();
        let mut connections = Connections::new();
        for (name, spec) in &setup.devices {
            let (scpi, dlt) = customize(name, scpi_mock(name, &log), dlt_mock(name, &log));
            connections.insert(
                name.clone(),
                DeviceLink::new(
                    ScpiClient::new(scpi, spec.ip.clone()),
                    DataLinkClient::new(dlt, spec.ip.clone()),
                ),
            );
        }
        Bench {
            log,
            controller: AcquisitionController::new(setup, connections),
        }
    }

    fn bench() -> Bench {
        bench_with(|_, scpi, dlt| (scpi, dlt))
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_sequence() {
        let mut bench = bench();
        let dir = tempdir().unwrap();

        bench
            .controller
            .begin(dir.path(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(bench.controller.state(), AcquisitionState::Running);
        assert_eq!(bench.controller.sessions().len(), 3);

        let master = bench.log.commands_for("m");
        assert_eq!(
            &master[..3],
            &[
                "INPUt1:HIREs:ERROr:CLEAr",
                "INPUt2:HIREs:ERROr:CLEAr",
                "REC:DUR 2000000000000;TRIG:ARM"
            ]
        );
        assert!(master.contains(&"HIST1:FLUSh".to_string()));
        assert_eq!(master.last().unwrap(), "GEN1:PLAY");
        assert!(!bench.log.commands_for("a").contains(&"GEN1:PLAY".to_string()));

        let saves = bench.log.commands_for("a-dlt");
        assert_eq!(saves.len(), 1);
        assert!(saves[0].contains("timestamps_a_0-3.bin"), "got: {}", saves[0]);
        assert!(saves[0].contains("--format bin"), "got: {}", saves[0]);

        // error counter cleared, then session opened, then streaming enabled
        let entries = bench.log.entries();
        let position = |endpoint: &str, command: &str| {
            entries
                .iter()
                .position(|(e, c)| e == endpoint && c.starts_with(command))
                .unwrap()
        };
        assert!(position("a", "RAW1:ERRORS:CLEAR") < position("a-dlt", "start-save"));
        assert!(position("a-dlt", "start-save") < position("a", "RAW1:SEND ON"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_writes_histograms_and_reports_clean() {
        let mut bench = bench();
        let dir = tempdir().unwrap();
        let output = dir.path().join("run");

        let report = bench
            .controller
            .run(&output, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.data_loss);
        assert_eq!(bench.controller.state(), AcquisitionState::Idle);
        assert!(bench.controller.sessions().is_empty());
        let histogram = output.join("histogram_m_1-2.csv");
        assert_eq!(std::fs::read_to_string(histogram).unwrap(), "0;2;5");
        assert_eq!(report.files.len(), 4);

        let master = bench.log.commands_for("m");
        assert!(master.contains(&"RAW2:SEND OFF".to_string()));
        // high resolution: error codes read back for every used input of each pair
        assert!(master.contains(&"INPUt1:HIREs:ERROr?".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_reports_data_loss_without_failing() {
        let mut bench = bench_with(|name, scpi, dlt| {
            if name == "a" {
                (
                    scpi.respond("RAW1:ERRORS?", "17"),
                    dlt.respond(
                        "stop",
                        r#"{"status": {"errors": [{"description": "buffer overflow"}]}}"#,
                    ),
                )
            } else {
                (scpi, dlt)
            }
        });
        let dir = tempdir().unwrap();
        bench
            .controller
            .begin(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();

        let report = bench.controller.end(Some(dir.path())).await.unwrap();

        assert_eq!(report.data_loss.len(), 1);
        let loss = &report.data_loss[0];
        assert_eq!(loss.device, "a");
        assert_eq!(loss.file, "timestamps_a_0-3.bin");
        assert_eq!(
            loss.errors,
            vec![
                "DataLinkTarget error: buffer overflow".to_string(),
                "RAW1:ERRORS? reports 17 errors.".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_always_waits_settle_time() {
        let mut bench = bench();
        let dir = tempdir().unwrap();
        bench
            .controller
            .begin(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        bench.controller.end(None).await.unwrap();
        assert!(started.elapsed() >= DEFAULT_SETTLE_TIME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_polls_until_settled() {
        let mut bench = bench_with(|name, scpi, dlt| {
            if name == "m" {
                let busy = r#"{"acquisitions_count": 3, "inactivity": 5.0, "errors": [{"description": "x"}]}"#;
                let done = r#"{"acquisitions_count": 0, "inactivity": 5.0, "errors": []}"#;
                (scpi, dlt.respond_seq("status", [busy, busy, busy, done]))
            } else {
                (scpi, dlt)
            }
        });
        let dir = tempdir().unwrap();
        bench
            .controller
            .begin(dir.path(), Duration::from_secs(3))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        bench.controller.wait(Duration::from_secs(3)).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(bench.controller.state(), AcquisitionState::Draining);
        // 3 s + guard, then three polling rounds one second apart
        assert!(elapsed >= Duration::from_millis(5100), "{elapsed:?}");
        let statuses = bench
            .log
            .commands_for("m-dlt")
            .into_iter()
            .filter(|c| c.starts_with("status"))
            .count();
        // settled sessions are not polled again
        assert_eq!(statuses, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_failure_cleans_up_and_reraises() {
        let mut bench = bench_with(|name, scpi, dlt| {
            if name == "a" {
                (
                    scpi,
                    dlt.respond("start-save", r#"{"error": {"description": "file locked"}}"#)
                        .respond("list", r#"[11, 12]"#),
                )
            } else {
                (scpi, dlt)
            }
        });
        let dir = tempdir().unwrap();

        let err = bench
            .controller
            .run(dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Command);
        assert!(err.to_string().contains("file locked"), "got: {err}");
        assert_eq!(bench.controller.state(), AcquisitionState::Faulted);
        let dlt = bench.log.commands_for("a-dlt");
        assert!(dlt.contains(&"stop 11".to_string()));
        assert!(dlt.contains(&"stop 12".to_string()));
        assert!(bench.log.commands_for("m-dlt").contains(&"list".to_string()));
        assert!(!bench.log.commands_for("m").contains(&"GEN1:PLAY".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let mut bench = bench();
        bench.controller.cleanup().await;
        bench.controller.cleanup().await;
        assert!(bench
            .log
            .commands()
            .iter()
            .all(|c| c == "list"));
    }

    #[tokio::test]
    async fn test_wait_requires_running() {
        let mut bench = bench();
        let err = bench.controller.wait(Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Acquisition);
        assert!(err.to_string().contains("idle"), "got: {err}");
    }

    #[test]
    fn test_output_dir_is_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("taken");
        std::fs::write(&file, "").unwrap();
        assert!(prepare_output_dir(&file).is_err());
        let nested = dir.path().join("a").join("b");
        prepare_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
