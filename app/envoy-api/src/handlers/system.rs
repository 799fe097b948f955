//! Health, host metrics, runtime inventory, and the environment doctor.

use crate::api::AppState;
use crate::error::Result;
use axum::extract::State;
use axum::Json;
use envoy_protocol::{
    AuthProvider, ContainerSummary, DoctorCheck, HostStats, NetworkSummary,
};

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /api/host/stats`
pub async fn host_stats(State(state): State<AppState>) -> Json<HostStats> {
    use envoy_core::host_stats::HostStatsSource;
    Json(state.host_stats.stats().await)
}

/// `GET /api/docker/containers`
pub async fn containers(State(state): State<AppState>) -> Result<Json<Vec<ContainerSummary>>> {
    Ok(Json(state.inventory.list_containers().await?))
}

/// `GET /api/docker/networks`
pub async fn networks(State(state): State<AppState>) -> Result<Json<Vec<NetworkSummary>>> {
    Ok(Json(state.inventory.list_networks().await?))
}

/// `GET /api/doctor`
///
/// Environment diagnostics: runtime reachability, sleeve network
/// presence, workspace root writability, committer identity, credential
/// presence.
pub async fn doctor(State(state): State<AppState>) -> Json<Vec<DoctorCheck>> {
    let mut checks = Vec::new();

    let (network, workspace_root, committer) = match state.config.read() {
        Ok(config) => (
            config.runtime.network.clone(),
            config.runtime.workspace_root.clone(),
            config.git.committer.clone(),
        ),
        Err(_) => {
            return Json(vec![DoctorCheck::fail(
                "Configuration",
                "configuration lock poisoned",
                "restart the envoy",
            )])
        }
    };

    match state.inventory.ping().await {
        Ok(()) => checks.push(DoctorCheck::pass("Container runtime", "runtime is reachable")),
        Err(err) => checks.push(DoctorCheck::fail(
            "Container runtime",
            format!("runtime unreachable: {err}"),
            "check that the container daemon is running and the socket is mounted",
        )),
    }

    match state.inventory.list_networks().await {
        Ok(networks) if networks.iter().any(|n| n.name == network) => {
            checks.push(DoctorCheck::pass(
                "Sleeve network",
                format!("network {network:?} exists"),
            ));
        }
        Ok(_) => checks.push(DoctorCheck::warning(
            "Sleeve network",
            format!("network {network:?} not found"),
            "it is created on the first spawn; no action needed",
        )),
        Err(err) => checks.push(DoctorCheck::fail(
            "Sleeve network",
            format!("could not list networks: {err}"),
            "check the container daemon",
        )),
    }

    let writable = std::fs::create_dir_all(&workspace_root).is_ok()
        && !std::fs::metadata(&workspace_root)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true);
    if writable {
        checks.push(DoctorCheck::pass(
            "Workspace root",
            format!("{} is writable", workspace_root.display()),
        ));
    } else {
        checks.push(DoctorCheck::fail(
            "Workspace root",
            format!("{} is not writable", workspace_root.display()),
            "fix ownership or mount the workspace volume",
        ));
    }

    let has_identity = (!committer.name.is_empty() && !committer.email.is_empty())
        || std::env::var("GIT_COMMITTER_NAME").is_ok_and(|v| !v.is_empty());
    if has_identity {
        checks.push(DoctorCheck::pass("Git identity", "committer identity configured"));
    } else {
        checks.push(DoctorCheck::warning(
            "Git identity",
            "no committer identity configured; commits will use the process-wide default",
            "set git.committer.name and git.committer.email",
        ));
    }

    let status = state.creds.status();
    for provider in AuthProvider::ALL {
        let authenticated = status
            .providers
            .get(&provider)
            .is_some_and(|s| s.authenticated);
        if authenticated {
            checks.push(DoctorCheck::pass(
                format!("{provider} credentials"),
                "credentials present",
            ));
        } else {
            checks.push(DoctorCheck::warning(
                format!("{provider} credentials"),
                "not authenticated",
                format!("POST /api/auth/{provider}/login with a token"),
            ));
        }
    }

    Json(checks)
}
