//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! batch_size = 50
//! heartbeat_interval_ms = 2000
//! dead_peer_factor = 2.5
//! auto_recover = true
//! frame_interval_ms = 16
//! store_path = "shuttle.redb"
//! notify_when_hidden = true
//! ```
//!
//! Every field is optional; missing fields take the defaults above.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tasks executed per synchronous pass before the executor yields.
    pub batch_size: usize,

    pub heartbeat_interval_ms: u64,

    /// A peer is evicted after `heartbeat_interval * dead_peer_factor` of silence.
    pub dead_peer_factor: f64,

    /// Replay pending store records on `initialize()`.
    pub auto_recover: bool,

    /// Delay standing in for the next paint opportunity when flushing buffered results.
    pub frame_interval_ms: u64,

    pub store_path: PathBuf,

    /// Raise a notification when a run completes while the surface is hidden.
    pub notify_when_hidden: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            heartbeat_interval_ms: 2_000,
            dead_peer_factor: 2.5,
            auto_recover: true,
            frame_interval_ms: 16,
            store_path: PathBuf::from("shuttle.redb"),
            notify_when_hidden: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if !(self.dead_peer_factor > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "dead_peer_factor must be greater than 1 (got {})",
                self.dead_peer_factor
            )));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn dead_peer_timeout(&self) -> Duration {
        self.heartbeat_interval().mul_f64(self.dead_peer_factor)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
