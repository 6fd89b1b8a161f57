//! Layered error definitions
//!
//! Categorized by source: config / connection / command / acquisition

use std::fmt;

use thiserror::Error;

/// Path to a property of the acquisition description, e.g. `/devices/tc1/inputs`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyPath(Vec<String>);

impl PropertyPath {
    /// Create a path from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Return a new path with one more segment
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Which instrument channel a command or connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Instrument control channel (text commands)
    Scpi,
    /// Bulk-transfer service control channel (JSON answers)
    DataLink,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scpi => f.write_str("SCPI"),
            Self::DataLink => f.write_str("DLT"),
        }
    }
}

/// Coarse error category, used for exhaustive handling by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Command,
    Acquisition,
    Io,
}

fn render_paths(paths: &[PropertyPath]) -> String {
    match paths {
        [single] => format!("configuration property path: {single}"),
        _ => {
            let mut out = String::from("configuration properties path:");
            for (i, path) in paths.iter().enumerate() {
                out.push_str(&format!("\n  {}) {}", i + 1, path));
            }
            out
        }
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error (syntax or schema shape)
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Semantic configuration error located at one or more properties
    #[error("{message}\n{}", render_paths(.paths))]
    ConfigProperty {
        message: String,
        paths: Vec<PropertyPath>,
    },

    /// Semantic configuration error without a single location
    #[error("configuration error: {message}")]
    Config { message: String },

    // ===== Connection Errors =====
    /// Device or bulk-transfer service unreachable
    #[error("unable to connect to {channel} of device {device} ({address}:{port}): {message}")]
    Connection {
        device: String,
        channel: ChannelKind,
        address: String,
        port: u16,
        message: String,
    },

    // ===== Command Errors =====
    /// Instrument or bulk-transfer service rejected a command
    #[error("[{channel}@{address}] {message}")]
    Command {
        channel: ChannelKind,
        address: String,
        message: String,
    },

    // ===== Acquisition Errors =====
    /// Failure while running an acquisition
    #[error("acquisition error: {message}")]
    Acquisition { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a property error located at a single path
    pub fn config_property(message: impl Into<String>, path: PropertyPath) -> Self {
        Self::ConfigProperty {
            message: message.into(),
            paths: vec![path],
        }
    }

    /// Create a property error located at several paths
    pub fn config_properties(message: impl Into<String>, paths: Vec<PropertyPath>) -> Self {
        Self::ConfigProperty {
            message: message.into(),
            paths,
        }
    }

    /// Create a configuration error without location
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a command error
    pub fn command(
        channel: ChannelKind,
        address: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Command {
            channel,
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create an acquisition error
    pub fn acquisition(message: impl Into<String>) -> Self {
        Self::Acquisition {
            message: message.into(),
        }
    }

    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParse { .. } | Self::ConfigProperty { .. } | Self::Config { .. } => {
                ErrorKind::Configuration
            }
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Command { .. } => ErrorKind::Command,
            Self::Acquisition { .. } => ErrorKind::Acquisition,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Property paths attached to the error, if any
    pub fn property_paths(&self) -> &[PropertyPath] {
        match self {
            Self::ConfigProperty { paths, .. } => paths,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_path_display() {
        let path = PropertyPath::new(["devices", "tc1"]).join("inputs");
        assert_eq!(path.to_string(), "/devices/tc1/inputs");
    }

    #[test]
    fn test_single_path_message() {
        let err = ContractError::config_property(
            "undefined device",
            PropertyPath::new(["layout", "device"]),
        );
        let text = err.to_string();
        assert!(text.starts_with("undefined device"), "got: {text}");
        assert!(text.contains("configuration property path: /layout/device"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_multiple_paths_are_numbered() {
        let err = ContractError::config_properties(
            "same address",
            vec![
                PropertyPath::new(["devices", "a", "ip"]),
                PropertyPath::new(["devices", "b", "ip"]),
            ],
        );
        let text = err.to_string();
        assert!(text.contains("1) /devices/a/ip"), "got: {text}");
        assert!(text.contains("2) /devices/b/ip"), "got: {text}");
        assert_eq!(err.property_paths().len(), 2);
    }

    #[test]
    fn test_command_error_names_channel_and_address() {
        let err = ContractError::command(ChannelKind::Scpi, "10.0.0.2", "SCPI_ERR_42");
        assert_eq!(err.to_string(), "[SCPI@10.0.0.2] SCPI_ERR_42");
        assert_eq!(err.kind(), ErrorKind::Command);
    }
}
