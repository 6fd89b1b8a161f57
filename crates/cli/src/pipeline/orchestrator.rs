//! Acquisition orchestrator - repeats acquisitions and handles interrupts.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use acquisition::AcquisitionController;
use anyhow::{Context, Result};
use contracts::Transport;
use tracing::{info, warn};

use super::{RunRecord, RunStats};

/// What to acquire
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Output directory
    pub output: PathBuf,

    /// Duration of each acquisition
    pub duration: Duration,

    /// Number of acquisitions
    pub repeat: u32,
}

impl RunPlan {
    /// Directory of acquisition `index`: `<output>/<index>/` when repeating
    pub fn output_dir(&self, index: u32) -> PathBuf {
        if self.repeat > 1 {
            self.output.join(index.to_string())
        } else {
            self.output.clone()
        }
    }
}

/// Runs the planned acquisitions on configured devices
pub struct Orchestrator<T> {
    controller: AcquisitionController<T>,
    plan: RunPlan,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(controller: AcquisitionController<T>, plan: RunPlan) -> Self {
        Self { controller, plan }
    }

    /// Run every acquisition, stopping the current one when `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let mut stats = RunStats::default();
        tokio::pin!(shutdown);

        for index in 0..self.plan.repeat {
            let output_dir = self.plan.output_dir(index);
            info!(
                index,
                output_dir = %output_dir.display(),
                duration_secs = self.plan.duration.as_secs_f64(),
                "Starting acquisition"
            );

            let outcome = tokio::select! {
                result = self.controller.run(&output_dir, self.plan.duration) => Some(result),
                _ = &mut shutdown => None,
            };

            match outcome {
                Some(result) => {
                    let report = result
                        .with_context(|| format!("Acquisition {index} failed"))?;
                    stats.runs.push(record(index, &output_dir, report));
                }
                None => {
                    warn!(index, "Received shutdown signal, stopping acquisition...");
                    stats.interrupted = true;
                    let report = self
                        .controller
                        .stop(Some(&output_dir))
                        .await
                        .with_context(|| format!("Failed to stop acquisition {index}"))?;
                    stats.runs.push(record(index, &output_dir, report));
                    break;
                }
            }
        }

        stats.duration = start_time.elapsed();
        info!(
            acquisitions = stats.runs.len(),
            files = stats.files(),
            data_loss = stats.data_loss(),
            interrupted = stats.interrupted,
            "Acquisitions completed"
        );
        Ok(stats)
    }
}

fn record(index: u32, output_dir: &Path, report: acquisition::AcquisitionReport) -> RunRecord {
    if report.is_clean() {
        info!(index, files = report.files.len(), "Acquisition completed without data loss");
    }
    RunRecord {
        index,
        output_dir: output_dir.to_path_buf(),
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};
    use connector::{CommandLog, Connections, DataLinkClient, DeviceLink, MockTransport, ScpiClient};

    const SETUP: &str = r#"{
        "devices": {
            "m": { "ip": "10.0.0.1", "inputs": { "1": {} },
                   "timestamps": { "acquisitions": [[0, 1]] } }
        },
        "layout": { "device": "m" }
    }"#;

    fn orchestrator(log: &CommandLog, plan: RunPlan) -> Orchestrator<MockTransport> {
        let setup = ConfigLoader::load_from_str(SETUP, ConfigFormat::Json).unwrap();
        let scpi = MockTransport::with_log("m", log.clone()).respond("RAW1:ERRORS?", "0");
        let dlt = MockTransport::with_log("m-dlt", log.clone())
            .respond("start-save", r#"{"id": 1}"#)
            .respond(
                "status",
                r#"{"acquisitions_count": 0, "inactivity": 0.1, "errors": []}"#,
            )
            .respond("stop", r#"{"status": {"errors": []}}"#)
            .respond("list", "[]");
        let mut connections = Connections::new();
        connections.insert(
            "m",
            DeviceLink::new(
                ScpiClient::new(scpi, "10.0.0.1"),
                DataLinkClient::new(dlt, "10.0.0.1"),
            ),
        );
        Orchestrator::new(AcquisitionController::new(setup, connections), plan)
    }

    #[test]
    fn test_output_dirs() {
        let single = RunPlan {
            output: "out".into(),
            duration: Duration::from_secs(1),
            repeat: 1,
        };
        assert_eq!(single.output_dir(0), PathBuf::from("out"));
        let repeated = RunPlan { repeat: 3, ..single };
        assert_eq!(repeated.output_dir(2), PathBuf::from("out").join("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_runs() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new();
        let plan = RunPlan {
            output: dir.path().join("out"),
            duration: Duration::from_secs(2),
            repeat: 2,
        };

        let stats = orchestrator(&log, plan)
            .run(std::future::pending())
            .await
            .unwrap();

        assert!(!stats.interrupted);
        assert_eq!(stats.runs.len(), 2);
        assert!(dir.path().join("out").join("0").is_dir());
        assert!(dir.path().join("out").join("1").is_dir());
        let saves = log
            .commands_for("m-dlt")
            .into_iter()
            .filter(|c| c.starts_with("start-save"))
            .count();
        assert_eq!(saves, 2);
        assert_eq!(stats.data_loss(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new();
        let plan = RunPlan {
            output: dir.path().to_path_buf(),
            duration: Duration::from_secs(60),
            repeat: 3,
        };

        let stats = orchestrator(&log, plan)
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.runs.len(), 1);
        let scpi = log.commands_for("m");
        let play = scpi.iter().position(|c| c == "GEN1:PLAY").unwrap();
        assert!(scpi[play..].contains(&"REC:STOP".to_string()));
        assert!(scpi[play..].contains(&"RAW1:SEND OFF".to_string()));
        assert!(log.commands_for("m-dlt").contains(&"stop 1".to_string()));
    }
}
