//! Common error variants shared across envoy crates.

use thiserror::Error;

/// Errors that occur across multiple envoy crates.
///
/// The variants correspond to the failure classes the HTTP surface needs to
/// distinguish: validation problems, conflicts with live state, missing
/// resources, failures of external collaborators (container runtime, VCS
/// subprocesses, sidecars), and everything else.
#[derive(Debug, Error)]
pub enum CommonError {
    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing input (bad name, malformed URL, unknown key).
    #[error("invalid input: {0}")]
    Validation(String),

    /// The operation conflicts with live state (workspace in use, name
    /// taken, dirty tree).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An external collaborator failed (container runtime, git, sidecar).
    #[error("external error: {0}")]
    External(String),

    /// Operation exceeded its allowed time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommonError {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new external error.
    #[must_use]
    pub fn external(msg: impl Into<String>) -> Self {
        Self::External(msg.into())
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a conflict error.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_produce_matching_variants() {
        assert!(CommonError::validation("x").is_validation());
        assert!(CommonError::conflict("x").is_conflict());
        assert!(CommonError::not_found("x").is_not_found());
        assert!(!CommonError::external("x").is_conflict());
    }

    #[test]
    fn io_errors_convert() {
        let err: CommonError = std::io::Error::other("boom").into();
        assert!(matches!(err, CommonError::Io(_)));
    }
}
