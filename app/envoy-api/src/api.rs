//! API router and shared application state.

use crate::handlers::{auth, config, sleeves, system, workspaces};
use crate::{sse, terminal};
use axum::routing::get;
use axum::Router;
use envoy_core::broadcast::StatusBroadcaster;
use envoy_core::creds::CredentialStore;
use envoy_core::host_stats::HostStatsCollector;
use envoy_core::hub::EventHub;
use envoy_core::runtime::{ExecRuntime, InventoryRuntime, SleeveRuntime};
use envoy_core::sleeve::SleeveManager;
use envoy_core::workspace::WorkspaceManager;
use envoy_core::EnvoyConfig;
use std::sync::{Arc, RwLock};
use tower_http::trace::TraceLayer;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live configuration; mutated by the config endpoints.
    pub config: Arc<RwLock<EnvoyConfig>>,
    /// Sleeve lifecycle manager.
    pub sleeves: Arc<SleeveManager>,
    /// Workspace registry and clone jobs.
    pub workspaces: Arc<WorkspaceManager>,
    /// Credential store.
    pub creds: Arc<CredentialStore>,
    /// Host metrics collector.
    pub host_stats: Arc<HostStatsCollector>,
    /// Event fan-out hub.
    pub hub: Arc<EventHub>,
    /// Status broadcaster (for init requests and clone progress).
    pub broadcaster: Arc<StatusBroadcaster>,
    /// Exec capability of the runtime, for terminals.
    pub exec: Arc<dyn ExecRuntime>,
    /// Lifecycle capability of the runtime, for container resolution.
    pub containers: Arc<dyn SleeveRuntime>,
    /// Inventory capability of the runtime, for listings and health.
    pub inventory: Arc<dyn InventoryRuntime>,
}

/// Creates the API router with all endpoints.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/api/events", get(sse::events))
        .route("/api/config", get(config::get_all))
        .route(
            "/api/config/:key",
            get(config::get_key)
                .put(config::set_key)
                .delete(config::reset_key),
        )
        .route("/api/auth/status", get(auth::status))
        .route("/api/auth/check", get(auth::check))
        .route(
            "/api/auth/:provider",
            get(auth::provider_status).delete(auth::revoke),
        )
        .route("/api/auth/:provider/login", axum::routing::post(auth::login))
        .route("/api/doctor", get(system::doctor))
        .route("/api/docker/containers", get(system::containers))
        .route("/api/docker/networks", get(system::networks))
        .route(
            "/api/workspaces",
            get(workspaces::list).post(workspaces::create),
        )
        .route(
            "/api/workspaces/clone",
            get(workspaces::clone_status).post(workspaces::clone_submit),
        )
        .route(
            "/api/workspaces/branches",
            get(workspaces::branches).post(workspaces::branch_action),
        )
        .route(
            "/api/workspaces/cstack",
            get(workspaces::cstack_stats).post(workspaces::cstack_action),
        )
        .route("/api/sleeves", get(sleeves::list).post(sleeves::spawn))
        .route(
            "/api/sleeves/:name",
            get(sleeves::info).delete(sleeves::kill),
        )
        .route("/api/host/stats", get(system::host_stats))
        .route("/sleeves/:name/terminal", get(terminal::sleeve_terminal))
        .route("/envoy/terminal", get(terminal::envoy_terminal))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
