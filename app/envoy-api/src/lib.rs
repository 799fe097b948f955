//! Envoy HTTP surface.
//!
//! REST endpoints over the orchestration runtime, a server-sent event
//! stream fed by the event hub, and the framed WebSocket terminal
//! gateway. Everything here is transport: behavior lives in
//! `envoy-core`, and this crate only maps it onto HTTP.

pub mod api;
pub mod error;
pub mod handlers;
pub mod server;
pub mod sse;
pub mod terminal;

pub use api::{create_router, AppState};
pub use error::{ApiError, Result};
pub use server::ApiServer;
