//! IEC 104 server error types

use errors::{ErrorCategory, VoltageError, VoltageErrorTrait};
use thiserror::Error;
use voltage_tasks::TaskError;

pub type Result<T> = std::result::Result<T, IecSrvError>;

/// Usage errors raised to the immediate caller
///
/// Select/execute arbitration is not an error; it surfaces as a
/// [`ResponseState`](crate::types::ResponseState) or `bool`.
#[derive(Error, Debug)]
pub enum IecSrvError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Station {0} already exists")]
    StationExists(u16),

    #[error("Station {0} not found")]
    StationNotFound(u16),

    #[error("Point {ioa} already exists in station {ca}")]
    PointExists { ca: u16, ioa: u32 },

    #[error("Task executor error: {0}")]
    Task(#[from] TaskError),
}

impl IecSrvError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

impl From<common::Error> for IecSrvError {
    fn from(err: common::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

// ============================================================================
// Service boundary conversion
// ============================================================================

impl From<IecSrvError> for VoltageError {
    fn from(err: IecSrvError) -> Self {
        match err {
            IecSrvError::InvalidArgument(msg) => VoltageError::Validation(msg),
            IecSrvError::OutOfRange(msg) => VoltageError::Validation(msg),
            IecSrvError::ConfigError(msg) => VoltageError::Configuration(msg),
            IecSrvError::StationExists(ca) => {
                VoltageError::AlreadyExists(format!("station {}", ca))
            },
            IecSrvError::StationNotFound(ca) => VoltageError::StationNotFound(ca.to_string()),
            IecSrvError::PointExists { ca, ioa } => {
                VoltageError::AlreadyExists(format!("point {} in station {}", ioa, ca))
            },
            IecSrvError::Task(e) => VoltageError::Scheduling(e.to_string()),
        }
    }
}

impl VoltageErrorTrait for IecSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "IECSRV_INVALID_ARGUMENT",
            Self::OutOfRange(_) => "IECSRV_OUT_OF_RANGE",
            Self::ConfigError(_) => "IECSRV_CONFIG_ERROR",
            Self::StationExists(_) => "IECSRV_STATION_EXISTS",
            Self::StationNotFound(_) => "IECSRV_STATION_NOT_FOUND",
            Self::PointExists { .. } => "IECSRV_POINT_EXISTS",
            Self::Task(_) => "IECSRV_TASK_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument(_) | Self::OutOfRange(_) => ErrorCategory::Validation,
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::StationExists(_) | Self::PointExists { .. } => ErrorCategory::Conflict,
            Self::StationNotFound(_) => ErrorCategory::NotFound,
            Self::Task(_) => ErrorCategory::Scheduling,
        }
    }
}
