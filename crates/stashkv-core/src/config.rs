//! `stashkv` Configuration Module
//!
//! Provides configuration file support via `stashkv.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (builder-style field assignment)
//! 2. Environment variables (`STASHKV_<SECTION>__<FIELD>`, e.g.
//!    `STASHKV_WEAK__RETAINED_CAPACITY=4096`)
//! 3. Configuration file (`stashkv.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },
}

/// Bloom filter sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Expected keys per strong store.
    pub strong_capacity: usize,
    /// Target false positive rate of the strong store filter.
    pub strong_fpr: f64,
    /// Expected keys per weak store.
    pub counting_capacity: usize,
    /// Target false positive rate of the weak store filter.
    pub counting_fpr: f64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            strong_capacity: 10_000,
            strong_fpr: 0.01,
            counting_capacity: 10_000,
            counting_fpr: 0.01,
        }
    }
}

/// Strong store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrongConfig {
    /// Seconds between two background filter rebuilds.
    pub rebuild_interval_secs: u64,
}

impl Default for StrongConfig {
    fn default() -> Self {
        Self {
            rebuild_interval_secs: 3600,
        }
    }
}

impl StrongConfig {
    /// Rebuild interval as a [`Duration`].
    #[must_use]
    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_secs)
    }
}

/// Weak store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeakConfig {
    /// Values the store keeps alive on its own (LRU). Values held by callers
    /// or by pending writes stay reachable regardless.
    pub retained_capacity: usize,
}

impl Default for WeakConfig {
    fn default() -> Self {
        Self {
            retained_capacity: 1024,
        }
    }
}

/// Writer thread and flush settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Upper bound of the writer's idle wait, in milliseconds.
    pub poll_interval_ms: u64,
    /// Interval at which `flush` re-checks the queue, in milliseconds.
    pub flush_poll_interval_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            flush_poll_interval_ms: 100,
        }
    }
}

impl WriterConfig {
    /// Writer idle wait as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Flush re-check interval as a [`Duration`].
    #[must_use]
    pub fn flush_poll_interval(&self) -> Duration {
        Duration::from_millis(self.flush_poll_interval_ms)
    }
}

/// SQLite connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// `PRAGMA journal_mode`.
    pub journal_mode: String,
    /// `PRAGMA synchronous`.
    pub synchronous: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main `stashkv` configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StashConfig {
    /// Bloom filter sizing.
    pub bloom: BloomConfig,
    /// Strong store settings.
    pub strong: StrongConfig,
    /// Weak store settings.
    pub weak: WeakConfig,
    /// Writer settings.
    pub writer: WriterConfig,
    /// SQLite settings.
    pub sqlite: SqliteConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl StashConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("stashkv.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STASHKV_").split("__"));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, capacity) in [
            ("bloom.strong_capacity", self.bloom.strong_capacity),
            ("bloom.counting_capacity", self.bloom.counting_capacity),
        ] {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "value must be > 0".to_string(),
                });
            }
        }

        for (key, fpr) in [
            ("bloom.strong_fpr", self.bloom.strong_fpr),
            ("bloom.counting_fpr", self.bloom.counting_fpr),
        ] {
            if !(fpr > 0.0 && fpr < 1.0) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("value {fpr} is out of range (0, 1)"),
                });
            }
        }

        if self.strong.rebuild_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "strong.rebuild_interval_secs".to_string(),
                message: "value must be > 0".to_string(),
            });
        }

        if self.weak.retained_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "weak.retained_capacity".to_string(),
                message: "value must be > 0".to_string(),
            });
        }

        for (key, ms) in [
            ("writer.poll_interval_ms", self.writer.poll_interval_ms),
            ("writer.flush_poll_interval_ms", self.writer.flush_poll_interval_ms),
        ] {
            if !(1..=60_000).contains(&ms) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("value {ms} is out of range [1, 60000]"),
                });
            }
        }

        let journal_modes = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
        if !journal_modes.contains(&self.sqlite.journal_mode.to_ascii_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "sqlite.journal_mode".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.sqlite.journal_mode, journal_modes
                ),
            });
        }

        let sync_modes = ["OFF", "NORMAL", "FULL", "EXTRA"];
        if !sync_modes.contains(&self.sqlite.synchronous.to_ascii_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "sqlite.synchronous".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.sqlite.synchronous, sync_modes
                ),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        Ok(())
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
