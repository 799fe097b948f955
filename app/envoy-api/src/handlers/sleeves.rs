//! Sleeve endpoints.

use crate::api::AppState;
use crate::error::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use envoy_protocol::{SleeveInfo, SpawnSleeveRequest};

/// `GET /api/sleeves`
pub async fn list(State(state): State<AppState>) -> Json<Vec<SleeveInfo>> {
    Json(state.sleeves.list())
}

/// `POST /api/sleeves`
pub async fn spawn(
    State(state): State<AppState>,
    Json(req): Json<SpawnSleeveRequest>,
) -> Result<(StatusCode, Json<SleeveInfo>)> {
    let sleeve = state.sleeves.spawn(req).await?;
    Ok((StatusCode::CREATED, Json(sleeve)))
}

/// `GET /api/sleeves/{name}`
pub async fn info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SleeveInfo>> {
    Ok(Json(state.sleeves.get(&name)?))
}

/// `DELETE /api/sleeves/{name}`
pub async fn kill(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode> {
    state.sleeves.kill(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
