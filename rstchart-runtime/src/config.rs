//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RSTCHART_CONFIG)
//! 3. Environment variables

use rstchart_storage::CheckpointPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session configuration.
    pub session: SessionConfig,
    /// Checkpoint configuration.
    pub checkpoint: CheckpointConfig,
    /// Invoke configuration.
    pub invoke: InvokeConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RSTCHART_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.session.apply_env_overrides();
        self.checkpoint.apply_env_overrides();
        self.invoke.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// External queue capacity per session (0 = unbounded).
    pub queue_capacity: usize,
    /// Data model used for charts that do not name one.
    pub datamodel: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            datamodel: "json".to_string(),
        }
    }
}

impl SessionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(capacity) = std::env::var("RSTCHART_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }

        if let Ok(kind) = std::env::var("RSTCHART_DATAMODEL") {
            if !kind.is_empty() {
                self.datamodel = kind;
            }
        }
    }

    /// Returns true if external queues are unbounded.
    pub fn is_unbounded(&self) -> bool {
        self.queue_capacity == 0
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Write checkpoints to `dir`.
    pub enabled: bool,
    /// Checkpoint directory.
    pub dir: PathBuf,
    /// When sessions checkpoint.
    pub policy: CheckpointPolicy,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./checkpoints"),
            policy: CheckpointPolicy::EveryMacrostep,
        }
    }
}

impl CheckpointConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("RSTCHART_CHECKPOINT_DIR") {
            self.dir = PathBuf::from(dir);
            self.enabled = true;
        }

        if let Ok(policy) = std::env::var("RSTCHART_CHECKPOINT_POLICY") {
            match policy.parse() {
                Ok(parsed) => self.policy = parsed,
                Err(e) => tracing::warn!("Ignoring RSTCHART_CHECKPOINT_POLICY: {}", e),
            }
        }
    }

    /// Returns whether automatic checkpoints are written.
    pub fn is_disabled(&self) -> bool {
        !self.enabled || self.policy == CheckpointPolicy::Never
    }
}

/// Invoke configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeConfig {
    /// How long a cancelled child session may take to wind down before its
    /// task is aborted.
    pub cancel_grace_ms: u64,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: 500,
        }
    }
}

impl InvokeConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(grace) = std::env::var("RSTCHART_CANCEL_GRACE_MS") {
            if let Ok(ms) = grace.parse() {
                self.cancel_grace_ms = ms;
            }
        }
    }

    /// Returns the cancel grace period as Duration.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.queue_capacity, 1024);
        assert_eq!(config.session.datamodel, "json");
        assert!(config.checkpoint.is_disabled());
        assert_eq!(config.invoke.cancel_grace(), Duration::from_millis(500));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.checkpoint.enabled = true;
        config.checkpoint.policy = CheckpointPolicy::EveryN(5);
        config.session.queue_capacity = 0;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.checkpoint.policy, CheckpointPolicy::EveryN(5));
        assert!(parsed.session.is_unbounded());
        assert!(!parsed.checkpoint.is_disabled());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed: Config = serde_yaml::from_str("session:\n  datamodel: \"null\"\n").unwrap();
        assert_eq!(parsed.session.datamodel, "null");
        assert_eq!(parsed.session.queue_capacity, 1024);
        assert_eq!(parsed.checkpoint.policy, CheckpointPolicy::EveryMacrostep);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rstchart.yaml");

        let mut config = Config::default();
        config.invoke.cancel_grace_ms = 25;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.invoke.cancel_grace_ms, 25);

        let missing = Config::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(..))));
    }
}
