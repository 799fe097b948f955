//! Common error types for the envoy workspace.
//!
//! This crate provides the unified error variants shared across the envoy
//! crates so that the HTTP layer can map failures to status codes without
//! string matching.
//!
//! # Crate-Specific Errors
//!
//! Each crate defines its own error type that wraps `CommonError`:
//!
//! ```rust,ignore
//! use envoy_error::CommonError;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum MyError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("my specific error: {0}")]
//!     Specific(String),
//! }
//! ```

mod common;

pub use common::CommonError;

/// Result type alias using `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;
