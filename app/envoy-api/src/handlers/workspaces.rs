//! Workspace and VCS endpoints.

use crate::api::AppState;
use crate::error::{ApiError, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use envoy_protocol::{
    BranchList, CloneJob, CloneWorkspaceRequest, CstackInitRequest, CstackInitResult,
    SwitchBranchRequest, WorkspaceInfo,
};
use serde::Deserialize;
use std::path::Path as FsPath;

/// `GET /api/workspaces`
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WorkspaceInfo>>> {
    Ok(Json(state.workspaces.list().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    #[serde(default)]
    pub name: String,
}

/// `POST /api/workspaces`
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<WorkspaceInfo>)> {
    let workspace = state.workspaces.create(&req.name)?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

/// `POST /api/workspaces/clone`
pub async fn clone_submit(
    State(state): State<AppState>,
    Json(req): Json<CloneWorkspaceRequest>,
) -> Result<(StatusCode, Json<CloneJob>)> {
    let job = state.workspaces.clone_repository(&req)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct CloneStatusQuery {
    #[serde(default)]
    pub id: String,
}

/// `GET /api/workspaces/clone?id=`
pub async fn clone_status(
    State(state): State<AppState>,
    Query(query): Query<CloneStatusQuery>,
) -> Result<Json<CloneJob>> {
    if query.id.is_empty() {
        return Err(ApiError::bad_request("job id required"));
    }
    Ok(Json(state.workspaces.job(&query.id)?))
}

#[derive(Debug, Deserialize)]
pub struct BranchQuery {
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub action: String,
}

/// `GET /api/workspaces/branches?workspace=`
pub async fn branches(
    State(state): State<AppState>,
    Query(query): Query<BranchQuery>,
) -> Result<Json<BranchList>> {
    if query.workspace.is_empty() {
        return Err(ApiError::bad_request("workspace parameter required"));
    }
    Ok(Json(state.workspaces.list_branches(&query.workspace).await?))
}

/// `POST /api/workspaces/branches?workspace=&action=`
///
/// Actions: `switch` (body `{branch}`), `fetch`, `pull`, `commit`,
/// `push`, and `fetch-all` (no workspace required).
pub async fn branch_action(
    State(state): State<AppState>,
    Query(query): Query<BranchQuery>,
    body: Option<Json<SwitchBranchRequest>>,
) -> Result<Json<serde_json::Value>> {
    if query.action == "fetch-all" {
        let result = state.workspaces.fetch_all().await;
        return Ok(Json(serde_json::to_value(result).unwrap_or_default()));
    }

    if query.workspace.is_empty() {
        return Err(ApiError::bad_request("workspace parameter required"));
    }
    let workspace = query.workspace.as_str();

    let result = match query.action.as_str() {
        "switch" => {
            let branch = body.map(|Json(req)| req.branch).unwrap_or_default();
            if branch.is_empty() {
                return Err(ApiError::bad_request("branch required"));
            }
            state.workspaces.switch_branch(workspace, &branch).await?;

            // Return the refreshed workspace record when available.
            let refreshed = state
                .workspaces
                .list()
                .await?
                .into_iter()
                .find(|w| w.path == workspace);
            return Ok(Json(match refreshed {
                Some(ws) => serde_json::to_value(ws).unwrap_or_default(),
                None => serde_json::json!({ "status": "ok" }),
            }));
        }
        "fetch" => state.workspaces.fetch_remote(workspace).await?,
        "pull" => state.workspaces.pull_remote(workspace).await?,
        "commit" => state.workspaces.commit_all(workspace, "envoy ui commit").await?,
        "push" => state.workspaces.push_remote(workspace).await?,
        other => {
            return Err(ApiError::bad_request(format!(
                "invalid action {other:?}: must be 'switch', 'fetch', 'pull', 'commit', 'push', or 'fetch-all'"
            )))
        }
    };

    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct CstackQuery {
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub action: String,
}

/// `GET /api/workspaces/cstack?workspace=`
pub async fn cstack_stats(
    State(state): State<AppState>,
    Query(query): Query<CstackQuery>,
) -> Result<Json<serde_json::Value>> {
    if query.workspace.is_empty() {
        return Err(ApiError::bad_request("workspace parameter required"));
    }

    match state
        .workspaces
        .cstack_stats(FsPath::new(&query.workspace))
        .await
    {
        Some(stats) => Ok(Json(serde_json::to_value(stats).unwrap_or_default())),
        None => Ok(Json(serde_json::json!({ "exists": false }))),
    }
}

/// `POST /api/workspaces/cstack?workspace=&action=init`
pub async fn cstack_action(
    State(state): State<AppState>,
    Query(query): Query<CstackQuery>,
    body: Option<Json<CstackInitRequest>>,
) -> Result<Json<CstackInitResult>> {
    if query.workspace.is_empty() {
        return Err(ApiError::bad_request("workspace parameter required"));
    }
    if query.action != "init" {
        return Err(ApiError::bad_request("action must be 'init'"));
    }

    let mode = body
        .map(|Json(req)| req.mode)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "minimal".to_string());

    Ok(Json(state.workspaces.init_cstack(&query.workspace, &mode).await?))
}
