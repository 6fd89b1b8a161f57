//! Acquisition statistics.

use std::path::PathBuf;
use std::time::Duration;

use acquisition::AcquisitionReport;

/// Outcome of one acquisition
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub index: u32,
    pub output_dir: PathBuf,
    pub report: AcquisitionReport,
}

/// Statistics over all acquisitions of a `run`
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub runs: Vec<RunRecord>,

    /// Stopped by a signal before the last acquisition completed
    pub interrupted: bool,

    /// Total wall time
    pub duration: Duration,
}

impl RunStats {
    pub fn files(&self) -> usize {
        self.runs.iter().map(|r| r.report.files.len()).sum()
    }

    /// Output files affected by a data loss
    pub fn data_loss(&self) -> usize {
        self.runs.iter().map(|r| r.report.data_loss.len()).sum()
    }

    pub fn print_summary(&self) {
        println!("\n=== Acquisition Statistics ===\n");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Acquisitions: {}", self.runs.len());
        println!("   ├─ Files: {}", self.files());
        println!("   ├─ Files with data loss: {}", self.data_loss());
        println!("   └─ Interrupted: {}", self.interrupted);

        for run in &self.runs {
            let status = if run.report.is_clean() {
                "clean"
            } else {
                "data loss"
            };
            println!(
                "\n   #{} {} ({}, {} files)",
                run.index,
                run.output_dir.display(),
                status,
                run.report.files.len()
            );
            for loss in &run.report.data_loss {
                println!("      ⚠ {}: {}", loss.file, loss.errors.join("; "));
            }
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acquisition::DataLoss;

    #[test]
    fn test_totals() {
        let mut lossy = AcquisitionReport::default();
        lossy.files.push("a.txt".into());
        lossy.files.push("b.txt".into());
        lossy.data_loss.push(DataLoss {
            device: "tc1".into(),
            file: "b.txt".into(),
            errors: vec!["RAW2:ERRORS? reports 4 errors.".into()],
        });
        let stats = RunStats {
            runs: vec![
                RunRecord {
                    index: 0,
                    output_dir: "out/0".into(),
                    report: lossy,
                },
                RunRecord {
                    index: 1,
                    output_dir: "out/1".into(),
                    report: AcquisitionReport::default(),
                },
            ],
            ..RunStats::default()
        };
        assert_eq!(stats.files(), 2);
        assert_eq!(stats.data_loss(), 1);
        stats.print_summary();
    }
}
