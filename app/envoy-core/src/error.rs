//! Error types for the core layer.

use envoy_error::CommonError;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Common errors (I/O, validation, conflict, not found, etc.).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Container runtime error.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::validation(msg))
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::conflict(msg))
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::Common(CommonError::not_found(resource))
    }

    /// Creates a new external error.
    #[must_use]
    pub fn external(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::external(msg))
    }

    /// Returns the common classification when present.
    #[must_use]
    pub const fn common(&self) -> Option<&CommonError> {
        match self {
            Self::Common(err) => Some(err),
            _ => None,
        }
    }
}

// Allow automatic conversion from std::io::Error via CommonError.
impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl From<bollard::errors::Error> for CoreError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}
