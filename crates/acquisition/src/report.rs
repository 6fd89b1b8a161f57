//! Data-loss reporting
//!
//! Lost timestamps, hardware error codes and bulk-transfer session errors never abort
//! an acquisition; they are logged once per affected output file.

use std::path::PathBuf;

use connector::ScpiClient;
use contracts::{AcquisitionPair, ContractError, Transport};
use serde::Serialize;
use tracing::warn;

/// Errors collected for one output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataLoss {
    pub device: String,
    pub file: String,
    pub errors: Vec<String>,
}

impl DataLoss {
    /// Log the warning
    pub fn log(&self) {
        warn!(
            device = %self.device,
            file = %self.file,
            "A data loss for {} occurred with the following errors:\n  * {}",
            self.file,
            self.errors.join("\n  * ")
        );
        observability::record_data_loss_warning(&self.device);
    }
}

/// Outcome of the end of an acquisition
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcquisitionReport {
    /// Files written by the bulk-transfer service or exported histograms
    pub files: Vec<PathBuf>,
    pub data_loss: Vec<DataLoss>,
}

impl AcquisitionReport {
    pub fn is_clean(&self) -> bool {
        self.data_loss.is_empty()
    }
}

/// High-resolution error codes of the inputs of `pair`
pub(crate) async fn hires_errors<T: Transport>(
    scpi: &mut ScpiClient<T>,
    pair: &AcquisitionPair,
) -> Vec<String> {
    let mut errors = Vec::new();
    let inputs = [pair.reference, pair.stop];
    for input in inputs.into_iter().filter(|i| *i != 0) {
        let command = format!("INPUt{input}:HIREs:ERROr?");
        match scpi.query_i64(&command).await {
            Ok(0) => {}
            Ok(code) => errors.push(format!("{command} reports errors (code {code}).")),
            Err(e) => errors.push(query_failure(&command, &e)),
        }
    }
    errors
}

/// Timestamps lost between the instrument and the bulk-transfer service
pub(crate) async fn raw_errors<T: Transport>(scpi: &mut ScpiClient<T>, index: u8) -> Vec<String> {
    let command = format!("RAW{index}:ERRORS?");
    match scpi.query_i64(&command).await {
        Ok(0) => Vec::new(),
        Ok(count) => vec![format!("{command} reports {count} errors.")],
        Err(e) => vec![query_failure(&command, &e)],
    }
}

pub(crate) fn query_failure(command: &str, error: &ContractError) -> String {
    format!("{command} could not be read: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector::MockTransport;

    #[tokio::test]
    async fn test_hires_errors_skip_missing_reference() {
        let transport = MockTransport::new("scpi")
            .respond("INPUt2:HIREs:ERROr?", "4")
            .respond("INPUt0:HIREs:ERROr?", "9");
        let mut scpi = ScpiClient::new(transport, "10.0.0.1");

        let errors = hires_errors(&mut scpi, &AcquisitionPair::new(0, 2)).await;
        assert_eq!(errors, vec!["INPUt2:HIREs:ERROr? reports errors (code 4)."]);
        assert_eq!(scpi.transport().commands(), vec!["INPUt2:HIREs:ERROr?"]);
    }

    #[tokio::test]
    async fn test_raw_errors() {
        let transport = MockTransport::new("scpi")
            .respond("RAW1:ERRORS?", "0")
            .respond("RAW2:ERRORS?", "12")
            .respond("RAW3:ERRORS?", "SCPI_ERR_-113");
        let mut scpi = ScpiClient::new(transport, "10.0.0.1");

        assert!(raw_errors(&mut scpi, 1).await.is_empty());
        assert_eq!(raw_errors(&mut scpi, 2).await, vec!["RAW2:ERRORS? reports 12 errors."]);
        assert!(raw_errors(&mut scpi, 3).await[0].contains("could not be read"));
    }

    #[test]
    fn test_report_clean() {
        let mut report = AcquisitionReport::default();
        assert!(report.is_clean());
        report.data_loss.push(DataLoss {
            device: "tc1".into(),
            file: "timestamps_tc1_0-1.txt".into(),
            errors: vec!["RAW1:ERRORS? reports 3 errors.".into()],
        });
        report.data_loss[0].log();
        assert!(!report.is_clean());
    }
}
