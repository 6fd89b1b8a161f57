//! # Config Loader
//!
//! Acquisition description loading.
//!
//! Responsibilities:
//! - Parse JSON/TOML descriptions, injecting defaults
//! - Check schema constraints and semantic rules
//! - Plan the trigger delay of every layout device
//! - Produce an `AcquisitionSetup`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let setup = ConfigLoader::load_from_path(Path::new("setup.json")).unwrap();
//! println!("Master: {}", setup.master());
//! ```

mod parser;
mod planner;
mod schema;
mod validator;

pub use contracts::{AcquisitionSetup, SetupDocument};
pub use parser::ConfigFormat;
pub use planner::plan;

use contracts::{ContractError, DelayLimits, LayoutTree};
use std::path::Path;
use tracing::{debug, warn};

/// Configuration loader
///
/// Provides static methods to load a setup from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a setup from file path
    ///
    /// Detects format from file extension (.json / .toml).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation or planning failure
    pub fn load_from_path(path: &Path) -> Result<AcquisitionSetup, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load a setup from string with the hardware delay limits
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<AcquisitionSetup, ContractError> {
        Self::load_with_limits(content, format, &DelayLimits::default())
    }

    /// Load a setup from string with custom delay limits
    pub fn load_with_limits(
        content: &str,
        format: ConfigFormat,
        limits: &DelayLimits,
    ) -> Result<AcquisitionSetup, ContractError> {
        let doc = parser::parse(content, format)?;
        Self::build(doc, limits)
    }

    /// Validate and plan an already parsed document
    pub fn build(
        doc: SetupDocument,
        limits: &DelayLimits,
    ) -> Result<AcquisitionSetup, ContractError> {
        schema::check(&doc)?;
        let layout = LayoutTree::from_layout(&doc.layout);
        let warnings = validator::validate(&doc, &layout)?;
        for warning in &warnings {
            warn!("{warning}");
        }

        let timing = planner::plan(&layout, limits)?;

        let SetupDocument {
            high_resolution,
            mut devices,
            ..
        } = doc;
        devices.retain(|name, _| layout.find(name).is_some());
        debug!(
            devices = devices.len(),
            p_max = timing.p_max,
            high_resolution,
            "setup loaded"
        );

        Ok(AcquisitionSetup {
            devices,
            layout,
            high_resolution,
            timing,
            warnings,
        })
    }

    /// Serialize a document to JSON string
    pub fn to_json(doc: &SetupDocument) -> Result<String, ContractError> {
        serde_json::to_string_pretty(doc)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }

    /// Serialize a document to TOML string
    pub fn to_toml(doc: &SetupDocument) -> Result<String, ContractError> {
        toml::to_string_pretty(doc)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}
