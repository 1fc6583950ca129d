//! Error types for background removal jobs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for job orchestration operations
pub type Result<T> = std::result::Result<T, SegmentError>;

/// Failure reported by the external removal engine
///
/// The message is surfaced verbatim, both to the caller of
/// [`process`](crate::SegmentOrchestrator::process) and in
/// [`JobState::error`](crate::JobState::error).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
#[serde(transparent)]
pub struct EngineFailure {
    message: String,
}

impl EngineFailure {
    /// Create a new engine failure with the given message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The engine-provided failure message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error types for job orchestration
#[derive(Error, Debug)]
pub enum SegmentError {
    /// The removal engine rejected the job (unsupported image, internal fault, out of memory, ...)
    #[error(transparent)]
    Engine(#[from] EngineFailure),

    /// `process()` was called without a usable image handle
    #[error("Invalid image handle: {0}")]
    InvalidImage(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (config file not found, permission denied, ...)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SegmentError {
    /// Create a new engine failure error
    pub fn engine<S: Into<String>>(msg: S) -> Self {
        Self::Engine(EngineFailure::new(msg))
    }

    /// Create a new invalid image error
    pub fn invalid_image<S: Into<String>>(msg: S) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// The engine failure behind this error, if the engine rejected the job
    #[must_use]
    pub fn as_engine_failure(&self) -> Option<&EngineFailure> {
        match self {
            Self::Engine(failure) => Some(failure),
            _ => None,
        }
    }
}
