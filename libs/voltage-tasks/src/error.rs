//! Task executor error types

use thiserror::Error;

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Task executor errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Periodic interval below the supported minimum
    #[error("Interval out of range: {interval_ms}ms (minimum {min_ms}ms)")]
    IntervalOutOfRange { interval_ms: u64, min_ms: u64 },

    /// The executor was already stopped
    #[error("Task executor stopped")]
    Stopped,

    /// The worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
