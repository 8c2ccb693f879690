//! Public auth endpoints (§6): built-in login, OIDC authorization-code
//! login/token-exchange/refresh, and the authenticated key-rotation
//! operator endpoint.

use std::sync::Arc;

use axum::extract::{Extension, Query, State};
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::AppState;
use crate::config::AuthMode;
use crate::errors::AppError;
use crate::identity::middleware::require_scope;
use crate::identity::{builtin, Identity};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "is_false")]
    pub must_change_password: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// `GET /api/auth/config` — tells the frontend/CLI whether auth is on and
/// which scheme to present. Public, no identity required.
pub async fn auth_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.config.auth_mode {
        Some(AuthMode::Oidc) => Json(json!({ "enabled": true, "mode": "oidc" })),
        Some(AuthMode::Builtin) => Json(json!({ "enabled": true, "mode": "builtin" })),
        None => Json(json!({ "enabled": false })),
    }
}

/// `GET /api/v1/scopes` — the closed scope set (§4.2).
pub async fn scopes() -> Json<&'static [&'static str]> {
    Json(crate::rbac::ALL_SCOPES)
}

/// `POST /api/auth/login {email, password}` — built-in issuer login
/// (§4.1). Uniform error on any failure; no user enumeration.
pub async fn builtin_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if state.config.auth_mode != Some(AuthMode::Builtin) {
        return Err(AppError::Unauthenticated);
    }
    let result = builtin::login(state.store.as_ref(), &req.email, &req.password)
        .await
        .map_err(|_| AppError::Unauthenticated)?;
    Ok(Json(LoginResponse {
        access_token: result.token,
        must_change_password: result.must_change_password,
    }))
}

/// `POST /api/auth/rotate-key` — retires the current signing key (with a
/// grace period) and mints a new active one (§4.1 "Key lifecycle").
/// Gated on `admin:users` since it invalidates every built-in session
/// eventually.
pub async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_scope(identity.as_ref(), "admin:users")?;
    let key = builtin::rotate(state.store.as_ref(), state.config.signing_key_grace_secs)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "kid": key.kid })))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `GET /api/auth/login` — 302 to the IdP authorization endpoint.
pub async fn oidc_login(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let verifier = state
        .oidc
        .as_ref()
        .ok_or_else(|| AppError::Validation("OIDC auth mode is not configured".into()))?;
    let url = verifier
        .authorize_url("hermes")
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    Ok(Redirect::to(&url))
}

/// `GET /api/auth/token?code=...` — exchanges the authorization code at
/// the IdP's token endpoint. IdP/network failures are `upstream` (502),
/// not `internal`.
pub async fn oidc_token(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let verifier = state
        .oidc
        .as_ref()
        .ok_or_else(|| AppError::Validation("OIDC auth mode is not configured".into()))?;
    let tokens = verifier
        .exchange_code(&q.code)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    Ok(Json(json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "expires_in": tokens.expires_in,
    })))
}

/// `POST /api/auth/refresh {refresh_token}`.
pub async fn oidc_refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let verifier = state
        .oidc
        .as_ref()
        .ok_or_else(|| AppError::Validation("OIDC auth mode is not configured".into()))?;
    let tokens = verifier
        .refresh(&req.refresh_token)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    Ok(Json(json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "expires_in": tokens.expires_in,
    })))
}
