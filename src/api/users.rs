//! Built-in user administration (§3 "User", §4.1 "Built-in path"). Every
//! operation here is gated on `admin:users`, which — per §4.2 — only
//! `is_admin` callers or credentials holding it directly ever carry.

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::errors::AppError;
use crate::identity::middleware::require_scope;
use crate::identity::Identity;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub password: String,
    #[serde(default)]
    pub must_change_password: bool,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub sub: String,
    pub username: String,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
    pub must_change_password: bool,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<crate::store::User> for UserResponse {
    fn from(u: crate::store::User) -> Self {
        Self {
            sub: u.sub,
            username: u.username,
            email: u.email,
            name: u.name,
            is_admin: u.is_admin,
            must_change_password: u.must_change_password,
            last_seen: u.last_seen,
        }
    }
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    require_scope(identity.as_ref(), "admin:users")?;
    let rows = state.store.list_users().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    require_scope(identity.as_ref(), "admin:users")?;

    let sub = format!("builtin:{}", req.email.to_lowercase());
    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let user = state
        .store
        .create_builtin_user(&sub, &req.username, &req.email, &req.name, &password_hash, req.is_admin)
        .await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn set_password(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Path(sub): Path<String>,
    Json(req): Json<SetPasswordRequest>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "admin:users")?;
    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    state
        .store
        .set_password(&sub, &password_hash, req.must_change_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Path(sub): Path<String>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "admin:users")?;
    state.store.delete_user(&sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
