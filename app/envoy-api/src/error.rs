//! Error types for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use envoy_core::CoreError;
use envoy_error::CommonError;
use thiserror::Error;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur in API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Core error, carrying its own classification.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Request-level problem detected in the HTTP layer itself.
    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// Creates a new bad request error.
    #[must_use]
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Returns the HTTP status code for this error: validation and bad
    /// requests map to 400, conflicts to 409, missing resources to 404,
    /// and everything else to 500.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Core(core) => match core.common() {
                Some(CommonError::Validation(_)) => StatusCode::BAD_REQUEST,
                Some(CommonError::Conflict(_)) => StatusCode::CONFLICT,
                Some(CommonError::NotFound(_)) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
