//! Configuration validation for the checkpoint engine
//!
//! This module contains functions for validating the configuration to ensure
//! all values are within acceptable ranges and consistent with each other.

use glob::Pattern;

use super::error::ConfigError;
use super::{AutoCheckpointConfig, CaptureConfig, Config, RestoreConfig, RetentionConfig, StorageConfig};
use crate::error::CheckpointError;
use crate::types::{ConflictResolution, StorageType};

/// Retention above this many checkpoints is allowed but logged.
const HIGH_MAX_CHECKPOINTS: usize = 10_000;

/// Validates the whole configuration.
///
/// # Errors
///
/// Returns a `ConfigError` (wrapped in `CheckpointError`) for the first
/// check that fails.
pub fn validate_config(config: &Config) -> Result<(), CheckpointError> {
    validate_storage_config(&config.storage)?;
    validate_capture_config(&config.capture)?;
    validate_restore_config(&config.restore)?;
    validate_auto_checkpoint_config(&config.auto_checkpoint)?;
    validate_retention_config(&config.retention)?;
    Ok(())
}

/// Validates the storage configuration.
fn validate_storage_config(config: &StorageConfig) -> Result<(), CheckpointError> {
    if config.storage_type == StorageType::File && config.path.trim().is_empty() {
        return Err(ConfigError::invalid_value(
            "storage.path",
            "",
            "Storage path cannot be empty for file storage",
        )
        .into());
    }

    if config.max_checkpoints == 0 {
        return Err(ConfigError::invalid_value(
            "storage.max_checkpoints",
            config.max_checkpoints,
            "max_checkpoints must be greater than 0",
        )
        .into());
    }

    if config.max_checkpoints > HIGH_MAX_CHECKPOINTS {
        log::warn!(
            "High value for max_checkpoints ({}). Every checkpoint stores full file contents.",
            config.max_checkpoints
        );
    }

    if config.lock_stale_seconds == 0 {
        return Err(ConfigError::invalid_value(
            "storage.lock_stale_seconds",
            config.lock_stale_seconds,
            "lock_stale_seconds must be greater than 0",
        )
        .into());
    }

    Ok(())
}

/// Validates the capture configuration.
fn validate_capture_config(config: &CaptureConfig) -> Result<(), CheckpointError> {
    if config.max_file_size == 0 {
        return Err(ConfigError::invalid_value(
            "capture.max_file_size",
            config.max_file_size,
            "max_file_size must be greater than 0",
        )
        .into());
    }

    validate_patterns("capture.include", &config.include)?;
    validate_patterns("capture.exclude", &config.exclude)?;
    Ok(())
}

/// Validates the restore configuration.
fn validate_restore_config(config: &RestoreConfig) -> Result<(), CheckpointError> {
    if config.merge_suffix.is_empty() || config.merge_suffix.contains(['/', '\\']) {
        return Err(ConfigError::invalid_value(
            "restore.merge_suffix",
            &config.merge_suffix,
            "merge_suffix must be non-empty and must not contain path separators",
        )
        .into());
    }

    if config.conflict_resolution == ConflictResolution::Prompt {
        log::info!("restore.conflict_resolution = prompt: conflicts are skipped unless a prompt handler is installed");
    }

    Ok(())
}

/// Validates the automatic checkpoint configuration.
fn validate_auto_checkpoint_config(config: &AutoCheckpointConfig) -> Result<(), CheckpointError> {
    if config.enabled && config.interval_seconds == 0 {
        return Err(ConfigError::invalid_value(
            "auto_checkpoint.interval_seconds",
            config.interval_seconds,
            "Automatic checkpoint interval must be greater than 0",
        )
        .into());
    }
    Ok(())
}

/// Validates the retention configuration.
fn validate_retention_config(config: &RetentionConfig) -> Result<(), CheckpointError> {
    if config.max_age_days == Some(0) {
        return Err(ConfigError::invalid_value(
            "retention.max_age_days",
            0,
            "max_age_days must be greater than 0 when set",
        )
        .into());
    }
    Ok(())
}

fn validate_patterns(field: &str, patterns: &[String]) -> Result<(), CheckpointError> {
    for pattern in patterns {
        if let Err(e) = Pattern::new(pattern) {
            return Err(ConfigError::invalid_value(field, pattern, format!("Invalid glob pattern: {}", e)).into());
        }
    }
    Ok(())
}
