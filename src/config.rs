// Logger configuration
//
// One JSON document holding every component's settings. Missing sections
// and fields take their defaults.

use crate::bridge::BridgeConfig;
use crate::clock::ClockConfig;
use crate::link::LinkConfig;
use crate::manager::ManagerConfig;
use crate::protocol::DriverConfig;
use crate::registry::ReconcilePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub link: LinkConfig,
    pub driver: DriverConfig,
    pub clock: ClockConfig,
    pub bridge: BridgeConfig,
    pub policy: ReconcilePolicy,
    pub manager: ManagerConfig,
    /// Directory of the registry database
    pub registry_dir: PathBuf,
    /// Where sample files go; `None` means a numbered directory under $DATA_DIR
    pub data_directory: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            driver: DriverConfig::default(),
            clock: ClockConfig::default(),
            bridge: BridgeConfig::default(),
            policy: ReconcilePolicy::default(),
            manager: ManagerConfig::default(),
            registry_dir: PathBuf::from("registry"),
            data_directory: None,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.driver.validate()?;
        self.clock.validate()?;
        self.bridge.validate()?;
        self.policy.validate()?;
        self.manager.validate()?;
        Ok(())
    }
}
