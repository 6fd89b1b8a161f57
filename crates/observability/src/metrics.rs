//! Acquisition and stream-merge metrics
//!
//! Thin helpers over the `metrics` facade; recorded values are only exported when a
//! recorder (Prometheus) is installed.

use metrics::{counter, gauge, histogram};

/// Block received on a streamed channel
pub fn record_block_received(channel: u8, bytes: usize) {
    counter!("tcsync_blocks_received_total", "channel" => channel.to_string()).increment(1);
    counter!("tcsync_received_bytes_total", "channel" => channel.to_string())
        .increment(bytes as u64);
}

/// Bytes waiting in a channel buffer
pub fn record_buffered_bytes(channel: u8, bytes: usize) {
    gauge!("tcsync_buffered_bytes", "channel" => channel.to_string()).set(bytes as f64);
}

/// Message index merged into the output
pub fn record_merged_index(index: usize, timestamps: usize, partial: bool) {
    counter!("tcsync_merged_timestamps_total").increment(timestamps as u64);
    counter!("tcsync_merged_indices_total").increment(1);
    if partial {
        counter!("tcsync_partial_indices_total").increment(1);
    }
    gauge!("tcsync_last_merged_index").set(index as f64);
    histogram!("tcsync_timestamps_per_index").record(timestamps as f64);
}

/// Block that arrived after its index was merged without it
pub fn record_late_block(channel: u8) {
    counter!("tcsync_late_blocks_total", "channel" => channel.to_string()).increment(1);
}

/// Data-loss warning raised for an output file
pub fn record_data_loss_warning(device: &str) {
    counter!("tcsync_data_loss_warnings_total", "device" => device.to_string()).increment(1);
}

/// Acquisition started on a device
pub fn record_acquisition_started(device: &str) {
    counter!("tcsync_acquisitions_started_total", "device" => device.to_string()).increment(1);
}

/// Statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_summary_display() {
        assert_eq!(StatsSummary::default().to_string(), "N/A");

        let mut stats = RunningStats::default();
        stats.push(10.0);
        stats.push(30.0);
        let text = stats.summary().to_string();
        assert!(text.contains("mean=20.000"), "got: {text}");
        assert!(text.contains("(n=2)"), "got: {text}");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_block_received(1, 64);
        record_buffered_bytes(1, 64);
        record_merged_index(0, 8, false);
        record_late_block(2);
        record_data_loss_warning("tc1");
        record_acquisition_started("tc1");
    }
}
