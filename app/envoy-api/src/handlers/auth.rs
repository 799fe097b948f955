//! Credential endpoints.

use crate::api::AppState;
use crate::error::{ApiError, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use envoy_core::CoreError;
use envoy_protocol::{
    AuthCheckResult, AuthLoginRequest, AuthLoginResult, AuthProvider, AuthRevokeResult,
    AuthStatus, ProviderAuthStatus,
};

/// `GET /api/auth/status`
pub async fn status(State(state): State<AppState>) -> Json<AuthStatus> {
    Json(state.creds.status())
}

/// `GET /api/auth/check`
pub async fn check(State(state): State<AppState>) -> Json<AuthCheckResult> {
    Json(state.creds.check())
}

/// `GET /api/auth/{provider}`
pub async fn provider_status(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<ProviderAuthStatus>> {
    let provider: AuthProvider = provider
        .parse()
        .map_err(|e: String| ApiError::Core(CoreError::not_found(e)))?;
    Ok(Json(state.creds.provider_status(provider)))
}

/// `POST /api/auth/{provider}/login`
///
/// A missing or empty token is a client mistake: the store reports it as
/// a failed result, surfaced here with a 400.
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: Option<Json<AuthLoginRequest>>,
) -> Result<(StatusCode, Json<AuthLoginResult>)> {
    let provider: AuthProvider = provider
        .parse()
        .map_err(|e: String| ApiError::Core(CoreError::validation(e)))?;
    let token = body.map(|Json(req)| req.token).unwrap_or_default();

    let result = state.creds.login(provider, &token)?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(result)))
}

/// `DELETE /api/auth/{provider}`
pub async fn revoke(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<AuthRevokeResult>> {
    let provider: AuthProvider = provider
        .parse()
        .map_err(|e: String| ApiError::Core(CoreError::validation(e)))?;
    Ok(Json(state.creds.revoke(provider)?))
}
