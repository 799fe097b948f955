//! Settings endpoints.
//!
//! Values changed here are persisted immediately but running subsystems
//! keep their construction-time snapshot; the responses say so.

use crate::api::AppState;
use crate::error::{ApiError, Result};
use axum::extract::{Path, State};
use axum::Json;
use envoy_core::CoreError;
use serde::Deserialize;

fn lock_poisoned() -> ApiError {
    ApiError::Core(CoreError::Common(envoy_error::CommonError::internal(
        "config lock poisoned",
    )))
}

/// `GET /api/config`
pub async fn get_all(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let config = state.config.read().map_err(|_| lock_poisoned())?;
    serde_json::to_value(&*config)
        .map(Json)
        .map_err(|e| ApiError::Core(CoreError::Config(e.to_string())))
}

/// `GET /api/config/{key}`
pub async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let config = state.config.read().map_err(|_| lock_poisoned())?;
    let value = config.value(&key)?;
    Ok(Json(serde_json::json!({ "key": key, "value": value })))
}

#[derive(Debug, Deserialize)]
pub struct SetValueRequest {
    #[serde(default)]
    pub value: String,
}

/// `PUT /api/config/{key}`
pub async fn set_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetValueRequest>,
) -> Result<Json<serde_json::Value>> {
    let mut config = state.config.write().map_err(|_| lock_poisoned())?;
    config.set_value(&key, &req.value)?;
    let value = config.value(&key)?;
    Ok(Json(serde_json::json!({
        "key": key,
        "value": value,
        "message": "saved - restart envoy to apply changes",
    })))
}

/// `DELETE /api/config/{key}`
pub async fn reset_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let mut config = state.config.write().map_err(|_| lock_poisoned())?;
    config.reset_value(&key)?;
    let value = config.value(&key)?;
    Ok(Json(serde_json::json!({
        "key": key,
        "value": value,
        "message": "reset to default - restart envoy to apply changes",
    })))
}
