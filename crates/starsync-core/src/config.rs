//! Configuration module for starsync.
//!
//! Provides typed configuration structs that map to the YAML
//! configuration file, with loading, validation, and defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the replication engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub transfer: TransferConfig,
    pub ignore: IgnoreConfig,
    pub logging: LoggingConfig,
}

/// Fan-out and change-detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of changes applied to a destination per batch.
    pub max_batch_size: usize,
    /// Seconds a sync-mode lock is held before auto-release.
    pub lock_timeout_secs: u64,
    /// Milliseconds between change-detector polling ticks.
    pub poll_interval_ms: u64,
    /// Milliseconds substrate events are buffered before flushing.
    pub debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            lock_timeout_secs: 30,
            poll_interval_ms: 1000,
            debounce_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Lock timeout as a `Duration`
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Detector polling period as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Event debounce window as a `Duration`
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Content streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of each content chunk (in KiB).
    pub chunk_size_kb: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { chunk_size_kb: 64 }
    }
}

impl TransferConfig {
    /// Chunk size in bytes
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_kb * 1024
    }
}

/// User-editable ignore patterns (the protected set is built in).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Gitignore-style patterns excluded from replication.
    pub patterns: Vec<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        let config: Config = serde_yaml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Checks that numeric settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be > 0".into()));
        }
        if self.engine.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.transfer.chunk_size_kb == 0 {
            return Err(ConfigError::Invalid("chunk_size_kb must be > 0".into()));
        }
        Ok(())
    }
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(String, #[source] std::io::Error),

    #[error("Failed to parse config file")]
    Parse(#[source] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.max_batch_size, 10);
        assert_eq!(config.engine.lock_timeout_secs, 30);
        assert_eq!(config.engine.poll_interval_ms, 1000);
        assert_eq!(config.engine.debounce_ms, 100);
        assert_eq!(config.transfer.chunk_size_kb, 64);
        assert_eq!(config.logging.level, "info");
        assert!(config.ignore.patterns.is_empty());
    }

    #[test]
    fn test_duration_accessors() {
        let engine = EngineConfig::default();
        assert_eq!(engine.lock_timeout(), Duration::from_secs(30));
        assert_eq!(engine.poll_interval(), Duration::from_millis(1000));
        assert_eq!(engine.debounce(), Duration::from_millis(100));
        assert_eq!(TransferConfig::default().chunk_size_bytes(), 64 * 1024);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "engine:\n  max_batch_size: 5\nignore:\n  patterns:\n    - \"*.tmp\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engine.max_batch_size, 5);
        // Unspecified fields keep their defaults
        assert_eq!(config.engine.lock_timeout_secs, 30);
        assert_eq!(config.ignore.patterns, vec!["*.tmp".to_string()]);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.engine.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/starsync.yaml"));
        assert_eq!(config.engine.max_batch_size, 10);
    }
}
