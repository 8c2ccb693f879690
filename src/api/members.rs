//! Namespace membership and OIDC group bindings (§3, §4.2).

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::errors::AppError;
use crate::identity::middleware::{require_scope, RequestNamespace};
use crate::identity::Identity;
use crate::rbac::Role;

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub sub: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct GroupBindingResponse {
    pub group: String,
    pub role: String,
}

fn parse_role(s: &str) -> Result<Role, AppError> {
    Role::parse(s).ok_or_else(|| AppError::Validation(format!("unknown role: {s}")))
}

pub async fn list_members(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<Vec<MemberResponse>>, AppError> {
    require_scope(identity.as_ref(), "member:read")?;
    let rows = state.store.list_members(&ns).await?;
    Ok(Json(
        rows.into_iter()
            .map(|m| MemberResponse {
                sub: m.sub,
                role: m.role.as_str().to_string(),
            })
            .collect(),
    ))
}

pub async fn upsert_member(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(sub): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "member:write")?;
    let role = parse_role(&req.role)?;
    state.store.upsert_member(&ns, &sub, role).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(sub): Path<String>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "member:write")?;
    state.store.remove_member(&ns, &sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_group_bindings(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<Vec<GroupBindingResponse>>, AppError> {
    require_scope(identity.as_ref(), "member:read")?;
    let rows = state.store.list_group_bindings(&ns).await?;
    Ok(Json(
        rows.into_iter()
            .map(|g| GroupBindingResponse {
                group: g.group,
                role: g.role.as_str().to_string(),
            })
            .collect(),
    ))
}

pub async fn upsert_group_binding(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(group): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "member:write")?;
    let role = parse_role(&req.role)?;
    state.store.upsert_group_binding(&ns, &group, role).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_group_binding(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(group): Path<String>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "member:write")?;
    state.store.remove_group_binding(&ns, &group).await?;
    Ok(StatusCode::NO_CONTENT)
}
