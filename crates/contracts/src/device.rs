//! DeviceSpec - static description of one time controller
//!
//! Input wiring, requested acquisitions and free-form commands. Immutable once loaded:
//! delays, connections and sessions are carried in side tables keyed by device name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Highest input / output / raw / histogram channel number of a device
pub const CHANNEL_COUNT: u8 = 4;

/// Channel number in `1..=4`
///
/// Used both for input channels (`inputs` keys) and for output channels (`agents` keys).
/// Deserialized from a string map key such as `"2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(u8);

impl Channel {
    /// Create a channel, `None` when outside `1..=4`
    pub fn new(number: u8) -> Option<Self> {
        (1..=CHANNEL_COUNT).contains(&number).then_some(Self(number))
    }

    /// Channel number
    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }

    /// All channels, ascending
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=CHANNEL_COUNT).map(Channel)
    }
}

impl TryFrom<String> for Channel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(Channel::new)
            .ok_or_else(|| format!("channel must be an integer in 1..={CHANNEL_COUNT}, got '{value}'"))
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0.to_string()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Active edge of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Edge {
    #[default]
    Rising,
    Falling,
}

impl Edge {
    pub fn as_command(self) -> &'static str {
        match self {
            Self::Rising => "RISING",
            Self::Falling => "FALLING",
        }
    }
}

/// Input signal shaping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputSelect {
    #[default]
    Unshaped,
    Shaped,
}

impl InputSelect {
    pub fn as_command(self) -> &'static str {
        match self {
            Self::Unshaped => "UNSHAPED",
            Self::Shaped => "SHAPED",
        }
    }
}

/// Configuration of one input channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Threshold (V)
    #[serde(default = "default_threshold")]
    #[validate(range(min = -2.0, max = 2.0))]
    pub threshold: f64,

    #[serde(default)]
    pub edge: Edge,

    /// Input delay (ps), may be negative
    #[serde(default)]
    pub delay: i64,

    #[serde(default)]
    pub select: InputSelect,
}

fn default_threshold() -> f64 {
    -0.5
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            edge: Edge::default(),
            delay: 0,
            select: InputSelect::default(),
        }
    }
}

/// (reference channel, stop channel) pair, written `[ref, stop]`
///
/// A reference of `0` means "no reference".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u8, u8)", into = "(u8, u8)")]
pub struct AcquisitionPair {
    pub reference: u8,
    pub stop: u8,
}

impl AcquisitionPair {
    pub fn new(reference: u8, stop: u8) -> Self {
        Self { reference, stop }
    }

    /// Reference input, `None` when referenceless
    pub fn reference_channel(&self) -> Option<Channel> {
        Channel::new(self.reference)
    }

    /// `"<ref>-<stop>"`, used in artifact names
    pub fn label(&self) -> String {
        format!("{}-{}", self.reference, self.stop)
    }
}

impl From<(u8, u8)> for AcquisitionPair {
    fn from((reference, stop): (u8, u8)) -> Self {
        Self { reference, stop }
    }
}

impl From<AcquisitionPair> for (u8, u8) {
    fn from(pair: AcquisitionPair) -> Self {
        (pair.reference, pair.stop)
    }
}

/// Raw timestamp file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawFormat {
    #[default]
    Ascii,
    Bin,
}

impl RawFormat {
    /// Name understood by the bulk-transfer service
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Bin => "bin",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Ascii => "txt",
            Self::Bin => "bin",
        }
    }
}

/// Raw timestamp acquisitions of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TimestampsConfig {
    #[serde(default)]
    #[validate(length(max = 4))]
    pub acquisitions: Vec<AcquisitionPair>,

    #[serde(default)]
    pub format: RawFormat,

    /// Prefix every timestamp with its reference index
    #[serde(default)]
    pub with_ref_index: bool,

    /// Host the bulk-transfer service streams to
    #[serde(default = "default_dlt_host")]
    #[validate(length(min = 1))]
    pub dlt_host: String,
}

fn default_dlt_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for TimestampsConfig {
    fn default() -> Self {
        Self {
            acquisitions: Vec::new(),
            format: RawFormat::default(),
            with_ref_index: false,
            dlt_host: default_dlt_host(),
        }
    }
}

/// Histogram export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistogramFormat {
    /// `;`-separated bin counts
    #[default]
    Csv,
    /// Plot descriptor with the non-empty bins
    Json,
}

impl HistogramFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Histogram acquisitions of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct HistogramsConfig {
    #[serde(default)]
    #[validate(length(max = 4))]
    pub acquisitions: Vec<AcquisitionPair>,

    #[serde(default)]
    pub format: HistogramFormat,

    /// Bin width (ps)
    #[serde(default = "default_bin_width")]
    #[validate(range(min = 1))]
    pub bin_width: u64,
}

fn default_bin_width() -> u64 {
    100
}

impl Default for HistogramsConfig {
    fn default() -> Self {
        Self {
            acquisitions: Vec::new(),
            format: HistogramFormat::default(),
            bin_width: default_bin_width(),
        }
    }
}

/// Static description of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DeviceSpec {
    /// Network address
    #[validate(length(min = 1))]
    pub ip: String,

    #[serde(default)]
    pub inputs: BTreeMap<Channel, InputConfig>,

    #[serde(default)]
    pub timestamps: Option<TimestampsConfig>,

    #[serde(default)]
    pub histograms: Option<HistogramsConfig>,

    /// Free-form commands applied after everything else
    #[serde(default)]
    pub config: Vec<String>,
}

/// Device map, keyed by device name
pub type Devices = BTreeMap<String, DeviceSpec>;

impl DeviceSpec {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            inputs: BTreeMap::new(),
            timestamps: None,
            histograms: None,
            config: Vec::new(),
        }
    }

    /// Raw timestamp acquisitions with their 1-based raw channel index
    pub fn raw_acquisitions(&self) -> impl Iterator<Item = (u8, AcquisitionPair)> + '_ {
        indexed(self.timestamps.as_ref().map(|t| t.acquisitions.as_slice()))
    }

    /// Histogram acquisitions with their 1-based histogram index
    pub fn histogram_acquisitions(&self) -> impl Iterator<Item = (u8, AcquisitionPair)> + '_ {
        indexed(self.histograms.as_ref().map(|h| h.acquisitions.as_slice()))
    }

    pub fn has_acquisitions(&self) -> bool {
        self.raw_acquisitions().next().is_some() || self.histogram_acquisitions().next().is_some()
    }

    /// Inputs referenced by any acquisition, ascending, without duplicates
    pub fn used_inputs(&self) -> Vec<Channel> {
        let mut used: Vec<Channel> = self
            .raw_acquisitions()
            .chain(self.histogram_acquisitions())
            .flat_map(|(_, pair)| [pair.reference_channel(), Channel::new(pair.stop)])
            .flatten()
            .collect();
        used.sort_unstable();
        used.dedup();
        used
    }
}

fn indexed(pairs: Option<&[AcquisitionPair]>) -> impl Iterator<Item = (u8, AcquisitionPair)> + '_ {
    pairs
        .unwrap_or_default()
        .iter()
        .zip(1u8..)
        .map(|(pair, index)| (index, *pair))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_injected() {
        let spec: DeviceSpec = serde_json::from_str(
            r#"{ "ip": "10.0.0.1", "inputs": { "2": {} }, "histograms": {} }"#,
        )
        .unwrap();
        let input = &spec.inputs[&Channel::new(2).unwrap()];
        assert_eq!(input, &InputConfig::default());
        assert_eq!(spec.histograms.unwrap().bin_width, 100);
        assert!(spec.timestamps.is_none());
    }

    #[test]
    fn test_channel_key_out_of_range_is_rejected() {
        let result: Result<DeviceSpec, _> =
            serde_json::from_str(r#"{ "ip": "10.0.0.1", "inputs": { "5": {} } }"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("1..=4"), "got: {err}");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<DeviceSpec, _> =
            serde_json::from_str(r#"{ "ip": "10.0.0.1", "colour": "red" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_used_inputs_skip_reference_zero() {
        let spec: DeviceSpec = serde_json::from_str(
            r#"{
                "ip": "10.0.0.1",
                "timestamps": { "acquisitions": [[0, 2], [1, 3]] },
                "histograms": { "acquisitions": [[1, 2]] }
            }"#,
        )
        .unwrap();
        let used: Vec<u8> = spec.used_inputs().into_iter().map(Channel::get).collect();
        assert_eq!(used, vec![1, 2, 3]);
        let raw: Vec<u8> = spec.raw_acquisitions().map(|(i, _)| i).collect();
        assert_eq!(raw, vec![1, 2]);
    }

    #[test]
    fn test_threshold_range() {
        let input = InputConfig {
            threshold: 2.5,
            ..InputConfig::default()
        };
        assert!(input.validate().is_err());
        assert!(InputConfig::default().validate().is_ok());
    }
}
