//! Output file naming

use contracts::{AcquisitionPair, HistogramFormat, RawFormat};

/// `timestamps_<device>_<ref>-<stop>.<txt|bin>`
pub fn raw_filename(device: &str, pair: &AcquisitionPair, format: RawFormat) -> String {
    format!(
        "timestamps_{device}_{}.{}",
        pair.label(),
        format.extension()
    )
}

/// `histogram_<device>_<ref>-<stop>.<csv|json>`
pub fn histogram_filename(device: &str, pair: &AcquisitionPair, format: HistogramFormat) -> String {
    format!(
        "histogram_{device}_{}.{}",
        pair.label(),
        format.extension()
    )
}
