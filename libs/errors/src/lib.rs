//! Service boundary errors for VoltageEMS binaries
//!
//! Library crates keep their own error enums (`TaskError`, `IecSrvError`) and
//! convert into [`VoltageError`] where a binary reports a failure and exits.
//! [`VoltageErrorTrait`] classifies those library errors without flattening
//! their variants.

use thiserror::Error;

/// Error returned from service entry points
#[derive(Debug, Error)]
pub enum VoltageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error("Point not found: {station}:{ioa}")]
    PointNotFound { station: u16, ioa: u32 },

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Deferred or periodic work could not be scheduled
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type VoltageResult<T> = Result<T, VoltageError>;

impl VoltageErrorTrait for VoltageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::StationNotFound(_) => "STATION_NOT_FOUND",
            Self::PointNotFound { .. } => "POINT_NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Scheduling(_) => "SCHEDULING_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::StationNotFound(_) | Self::PointNotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists(_) => ErrorCategory::Conflict,
            Self::Scheduling(_) => ErrorCategory::Scheduling,
            Self::StartupFailed(_) | Self::Io(_) | Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Error category, drives the log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    NotFound,
    Conflict,
    Scheduling,
    Internal,
    Unknown,
}

/// Common interface of the per-crate error enums
pub trait VoltageErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable code for logs
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Scheduling => Level::ERROR,
            ErrorCategory::Validation | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = VoltageError::Configuration("bad".into());
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.log_level(), tracing::Level::WARN);

        let err = VoltageError::PointNotFound { station: 1, ioa: 100 };
        assert_eq!(err.to_string(), "Point not found: 1:100");
        assert_eq!(err.log_level(), tracing::Level::INFO);

        let err = VoltageError::Scheduling("executor stopped".into());
        assert_eq!(err.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.yaml");
        let err: VoltageError = io.into();
        assert_eq!(err.category(), ErrorCategory::Internal);

        let err: VoltageError = anyhow::anyhow!("boom").into();
        assert_eq!(err.error_code(), "OTHER_ERROR");
        assert_eq!(err.to_string(), "boom");
    }
}
