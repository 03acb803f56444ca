//! Node configuration loaded from YAML
//!
//! ```yaml
//! log_level: info
//! commitment:
//!   total_iterations: 100000
//!   block_size: 10000
//! db_path: ./data/commitments
//! ```
//!
//! Every field is optional; missing ones fall back to the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use crate::rc_commitment::CommitmentConfig;
use crate::rc_errors::CommitmentError;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Log level name understood by `log::LevelFilter` (error, warn, info, debug, trace)
    pub log_level: String,

    pub commitment: CommitmentConfig,

    /// RocksDB directory; in-memory storage when absent
    pub db_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            commitment: CommitmentConfig::default(),
            db_path: None,
        }
    }
}

impl NodeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CommitmentError> {
        let config: NodeConfig = serde_yaml::from_str(yaml)
            .map_err(|e| CommitmentError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, CommitmentError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| {
            CommitmentError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), CommitmentError> {
        self.level_filter()?;
        self.commitment.validate()
    }

    pub fn level_filter(&self) -> Result<log::LevelFilter, CommitmentError> {
        self.log_level
            .parse()
            .map_err(|_| CommitmentError::InvalidConfig(format!("unknown log level {}", self.log_level)))
    }
}
