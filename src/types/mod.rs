//! Core type definitions shared by configuration and the engines

mod conflict;
mod log_level;
mod storage;

pub use conflict::ConflictResolution;
pub use log_level::LogLevel;
pub use storage::{EvictionPolicy, StorageType};
