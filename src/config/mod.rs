//! Configuration management for the checkpoint engine
//!
//! This module handles loading, validating, and providing access to the
//! engine configuration. It supports loading configuration from TOML files,
//! environment variable overrides, and programmatic construction. The engines
//! themselves never read the environment; they receive options built from a
//! [`Config`] by the caller.

#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod validation;

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod validation_tests;

#[cfg(test)]
#[path = "tests/config_mod_tests.rs"]
mod config_mod_tests;

use std::{
    env,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use directories::ProjectDirs;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureOptions;
use crate::core::filter::{default_exclude_patterns, default_include_patterns};
use crate::restore::RestoreOptions;
use crate::types::{ConflictResolution, EvictionPolicy, LogLevel, StorageType};

/// Re-export the error type
pub use error::ConfigError;

/// The environment variable prefix for configuration overrides
const ENV_PREFIX: &str = "CKPT_";

/// The application name used for finding config directories
const APP_NAME: &str = "checkpoint-engine";

/// Default upper bound on a single captured file (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Main configuration structure for the checkpoint engine.
///
/// # Example
///
/// ```no_run
/// use checkpoint_engine::config::Config;
///
/// // A missing file falls back to defaults (plus environment overrides).
/// let config = Config::load("checkpoint.toml").unwrap();
/// assert!(config.storage.max_checkpoints > 0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Default capture options
    pub capture: CaptureConfig,

    /// Default restore options
    pub restore: RestoreConfig,

    /// Automatic checkpoint timer
    pub auto_checkpoint: AutoCheckpointConfig,

    /// Age-based retention
    pub retention: RetentionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Root directory for file storage (ignored for memory storage)
    pub path: String,
    /// Maximum number of checkpoints kept; older ones are evicted
    pub max_checkpoints: usize,
    /// Which checkpoints are evicted first
    pub eviction: EvictionPolicy,
    /// Age after which a leftover lock file is considered stale
    pub lock_stale_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::File,
            path: ".checkpoints".to_string(),
            max_checkpoints: 50,
            eviction: EvictionPolicy::OldestFirst,
            lock_stale_seconds: 300,
        }
    }
}

/// Default capture options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Glob patterns to leave out
    pub exclude: Vec<String>,
    /// Glob patterns a file must match to be captured
    pub include: Vec<String>,
    /// Whether symbolic links are followed
    pub follow_symlinks: bool,
    /// Files larger than this are skipped and counted
    pub max_file_size: u64,
    /// Whether dot-files and dot-directories are captured
    pub include_hidden: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            exclude: default_exclude_patterns(),
            include: default_include_patterns(),
            follow_symlinks: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            include_hidden: false,
        }
    }
}

/// Default restore options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Back up the target before writing into it
    pub create_backup: bool,
    /// What to do with files that already exist at the target
    pub conflict_resolution: ConflictResolution,
    /// Restore captured permission bits
    pub restore_permissions: bool,
    /// Restore captured modification times
    pub restore_timestamps: bool,
    /// Re-hash restored files afterwards
    pub verify: bool,
    /// Suffix for the checkpoint copy written under `merge`
    pub merge_suffix: String,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            create_backup: true,
            conflict_resolution: ConflictResolution::Overwrite,
            restore_permissions: true,
            restore_timestamps: true,
            verify: true,
            merge_suffix: ".restored".to_string(),
        }
    }
}

/// Automatic checkpoint timer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCheckpointConfig {
    /// Whether the timer is started with the manager
    pub enabled: bool,
    /// Seconds between automatic checkpoints
    pub interval_seconds: u64,
}

impl Default for AutoCheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 300,
        }
    }
}

impl AutoCheckpointConfig {
    /// The interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Age-based retention
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Checkpoints older than this many days are removed by `prune`.
    /// `None` keeps checkpoints regardless of age.
    pub max_age_days: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Whether to log to console
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
        }
    }
}

impl Config {
    /// Loads the configuration from the specified path.
    ///
    /// A missing file falls back to the built-in defaults. In both cases
    /// environment variables with the `CKPT_` prefix are applied on top and
    /// the result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, if
    /// an environment override is malformed, or if validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut config = match fs::read_to_string(path) {
            Ok(config_str) => toml::from_str::<Config>(&config_str)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Config file not found at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(ConfigError::file_not_found(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        config.apply_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Recognised variables: `CKPT_LOGGING_LEVEL`, `CKPT_STORAGE_PATH`,
    /// `CKPT_STORAGE_MAX_CHECKPOINTS`, `CKPT_AUTO_CHECKPOINT_INTERVAL_SECONDS`.
    ///
    /// # Errors
    ///
    /// Returns an error if any recognised variable cannot be parsed.
    pub fn apply_env_vars(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }

            match stripped.to_lowercase().as_str() {
                "logging_level" => {
                    self.logging.level = value.parse().map_err(|_| {
                        ConfigError::invalid_value("logging.level", &value, "Invalid log level")
                    })?;
                }
                "storage_path" => {
                    self.storage.path = value.clone();
                }
                "storage_max_checkpoints" => {
                    self.storage.max_checkpoints = value.parse().map_err(|_| {
                        ConfigError::invalid_value("storage.max_checkpoints", &value, "Expected a positive integer")
                    })?;
                }
                "auto_checkpoint_interval_seconds" => {
                    self.auto_checkpoint.interval_seconds = value.parse().map_err(|_| {
                        ConfigError::invalid_value(
                            "auto_checkpoint.interval_seconds",
                            &value,
                            "Expected a positive integer",
                        )
                    })?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match validation::validate_config(self) {
            Ok(()) => Ok(()),
            Err(crate::error::CheckpointError::ConfigError(config_error)) => Err(config_error),
            Err(other) => Err(ConfigError::Other(other.to_string())),
        }
    }

    /// Serializes the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// The storage root as a path.
    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.path)
    }

    /// Capture options built from the `[capture]` section.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            exclude: self.capture.exclude.clone(),
            include: self.capture.include.clone(),
            follow_symlinks: self.capture.follow_symlinks,
            max_file_size: self.capture.max_file_size,
            include_hidden: self.capture.include_hidden,
            ..CaptureOptions::default()
        }
    }

    /// Restore options built from the `[restore]` section.
    pub fn restore_options(&self) -> RestoreOptions {
        RestoreOptions {
            create_backup: self.restore.create_backup,
            conflict_resolution: self.restore.conflict_resolution,
            restore_permissions: self.restore.restore_permissions,
            restore_timestamps: self.restore.restore_timestamps,
            verify: self.restore.verify,
            merge_suffix: self.restore.merge_suffix.clone(),
            ..RestoreOptions::default()
        }
    }

    /// Returns the path to the directory where configuration files should be stored.
    ///
    /// This is OS-specific:
    /// - Linux: `$HOME/.config/checkpoint-engine`
    /// - macOS: `$HOME/Library/Application Support/com.checkpoint.checkpoint-engine`
    /// - Windows: `%APPDATA%\\checkpoint\\checkpoint-engine`
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "checkpoint", APP_NAME)
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
    }
}
