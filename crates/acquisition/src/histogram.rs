//! Histogram read-back and export

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use connector::ScpiClient;
use contracts::{ContractError, HistogramFormat, Transport};
use serde::Serialize;

/// Histogram as read back from an instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub bins: Vec<u64>,
    /// Time of the first bin (ps)
    pub bin_min: f64,
    /// Bin width (ps)
    pub bin_width: f64,
}

impl Histogram {
    /// Read histogram `index` (1-based)
    pub async fn read<T: Transport>(
        scpi: &mut ScpiClient<T>,
        index: u8,
    ) -> Result<Self, ContractError> {
        let bins = scpi
            .query_counts(&format!("HIST{index}:DATA?"), Some(80))
            .await?;
        let bin_min = scpi.query_f64(&format!("HIST{index}:MIN?"), "TB").await?;
        let bin_width = scpi.query_f64(&format!("HIST{index}:BWID?"), "TB").await?;
        Ok(Self {
            bins,
            bin_min,
            bin_width,
        })
    }

    /// Non-empty bins as `(time, count)`
    pub fn non_empty(&self) -> Vec<(f64, u64)> {
        self.bins
            .iter()
            .enumerate()
            .filter(|(_, count)| **count != 0)
            .map(|(i, count)| (self.bin_min + i as f64 * self.bin_width, *count))
            .collect()
    }

    pub fn save(&self, path: &Path, format: HistogramFormat) -> Result<(), ContractError> {
        let mut writer = BufWriter::new(File::create(path)?);
        match format {
            HistogramFormat::Csv => {
                let line = self
                    .bins
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(";");
                writer.write_all(line.as_bytes())?;
            }
            HistogramFormat::Json => {
                let plot = PlotDescriptor {
                    unit: "ps",
                    bin_min: self.bin_min,
                    bin_width: self.bin_width,
                    bin_count: self.bins.len(),
                    bins: self.non_empty(),
                };
                serde_json::to_writer_pretty(&mut writer, &plot).map_err(std::io::Error::from)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

/// Stem plot data handed to an external renderer
#[derive(Serialize)]
struct PlotDescriptor {
    unit: &'static str,
    bin_min: f64,
    bin_width: f64,
    bin_count: usize,
    bins: Vec<(f64, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector::MockTransport;
    use tempfile::tempdir;

    fn histogram() -> Histogram {
        Histogram {
            bins: vec![0, 3, 0, 7],
            bin_min: 1000.0,
            bin_width: 100.0,
        }
    }

    #[tokio::test]
    async fn test_read() {
        let transport = MockTransport::new("scpi")
            .respond("HIST2:DATA?", "[0,3,0,7]")
            .respond("HIST2:MIN?", "1000TB")
            .respond("HIST2:BWID?", "100TB");
        let mut scpi = ScpiClient::new(transport, "10.0.0.1");
        assert_eq!(Histogram::read(&mut scpi, 2).await.unwrap(), histogram());
    }

    #[test]
    fn test_non_empty_bins() {
        assert_eq!(histogram().non_empty(), vec![(1100.0, 3), (1300.0, 7)]);
    }

    #[test]
    fn test_save_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("histogram_tc1_1-2.csv");
        histogram().save(&path, HistogramFormat::Csv).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0;3;0;7");
    }

    #[test]
    fn test_save_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("histogram_tc1_1-2.json");
        histogram().save(&path, HistogramFormat::Json).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["bin_count"], 4);
        assert_eq!(value["bins"], serde_json::json!([[1100.0, 3], [1300.0, 7]]));
    }
}
