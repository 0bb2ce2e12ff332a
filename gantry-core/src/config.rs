//! Config - Settings for one reconciliation run

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// If true, plan only; every step is skipped
    pub dry_run: bool,
    /// Tag key prefixes owned by the provider; never compared or touched
    pub reserved_tag_prefixes: Vec<String>,
    pub wait: WaitDefaults,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            reserved_tag_prefixes: vec!["aws:".to_string()],
            wait: WaitDefaults::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// Defaults for waits that don't specify their own bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitDefaults {
    pub at_most_secs: u64,
    pub check_every_secs: u64,
    /// Ask the operator whether to keep waiting on timeout
    pub prompt: bool,
}

impl Default for WaitDefaults {
    fn default() -> Self {
        Self {
            at_most_secs: 600,
            check_every_secs: 10,
            prompt: false,
        }
    }
}

impl WaitDefaults {
    pub fn at_most(&self) -> Duration {
        Duration::from_secs(self.at_most_secs)
    }

    pub fn check_every(&self) -> Duration {
        Duration::from_secs(self.check_every_secs)
    }
}
