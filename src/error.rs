//! Error types for the checkpoint engine
//!
//! This module defines the error types used throughout the checkpoint engine.
//! The main error type is `CheckpointError`, which covers conditions that are
//! fatal to a single operation (an inaccessible capture root, a missing
//! checkpoint, a held lock). Per-entry failures during capture or restore are
//! not errors at this level; they are collected into the operation's report.

use thiserror::Error;

/// Main error type for the checkpoint engine
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error (JSON): {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// TOML serialization/deserialization error
    #[error("Configuration error (TOML): {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    /// The capture root could not be read
    #[error("Capture failed: {0}")]
    CaptureError(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A stored checkpoint no longer matches its recorded hash
    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource is already in use
    #[error("Resource already in use: {0}")]
    AlreadyInUse(String),

    /// Operation was cancelled before completion
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Unknown or unexpected error
    #[error("An unknown error occurred: {0}")]
    Unknown(String),
}

/// Result type alias for operations that can fail with a [CheckpointError]
pub type Result<T> = std::result::Result<T, CheckpointError>;

impl CheckpointError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        CheckpointError::InvalidInput(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        CheckpointError::NotFound(what.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        CheckpointError::StorageError(msg.into())
    }

    /// Create a new capture error
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        CheckpointError::CaptureError(msg.into())
    }

    /// Create a new already in use error
    pub fn already_in_use<S: Into<String>>(what: S) -> Self {
        CheckpointError::AlreadyInUse(what.into())
    }
}

impl From<&str> for CheckpointError {
    fn from(s: &str) -> Self {
        CheckpointError::invalid_input(s)
    }
}

impl From<String> for CheckpointError {
    fn from(s: String) -> Self {
        CheckpointError::invalid_input(s)
    }
}

impl From<base64::DecodeError> for CheckpointError {
    fn from(err: base64::DecodeError) -> Self {
        CheckpointError::IntegrityError(format!("Invalid base64 payload: {}", err))
    }
}

impl From<glob::PatternError> for CheckpointError {
    fn from(err: glob::PatternError) -> Self {
        CheckpointError::invalid_input(format!("Invalid glob pattern: {}", err))
    }
}

impl From<tokio::task::JoinError> for CheckpointError {
    fn from(err: tokio::task::JoinError) -> Self {
        CheckpointError::Unknown(format!("Async task error: {}", err))
    }
}
