//! Runtime status reporting and query (§3 "Instance status", "Controller
//! status"). Gateways report via `status:write`; dashboards/controllers
//! read via `status:read`. The reaper (`jobs::reaper`) is what actually
//! flips stale rows offline — these handlers only read/write the
//! caller-supplied snapshot.

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::errors::AppError;
use crate::identity::middleware::{require_scope, RequestNamespace};
use crate::identity::Identity;

#[derive(Debug, Deserialize)]
pub struct ReportStatusRequest {
    pub status: String,
    #[serde(default)]
    pub config_revision: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReportControllerStatusRequest {
    pub status: String,
    #[serde(default)]
    pub config_revision: i64,
    #[serde(default)]
    pub is_leader: bool,
}

#[derive(Debug, Serialize)]
pub struct InstanceStatusResponse {
    pub id: String,
    pub status: String,
    pub config_revision: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct ControllerStatusResponse {
    pub id: String,
    pub status: String,
    pub config_revision: i64,
    pub is_leader: bool,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_instances(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<Vec<InstanceStatusResponse>>, AppError> {
    require_scope(identity.as_ref(), "status:read")?;
    let rows = state.store.list_instance_status(&ns).await?;
    Ok(Json(
        rows.into_iter()
            .map(|i| InstanceStatusResponse {
                id: i.id,
                status: i.status,
                config_revision: i.config_revision,
                updated_at: i.updated_at,
            })
            .collect(),
    ))
}

pub async fn report_instance(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(id): Path<String>,
    Json(req): Json<ReportStatusRequest>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "status:write")?;
    state
        .store
        .upsert_instance_status(&ns, &id, &req.status, req.config_revision)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_controllers(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<Vec<ControllerStatusResponse>>, AppError> {
    require_scope(identity.as_ref(), "status:read")?;
    let rows = state.store.list_controller_status(&ns).await?;
    Ok(Json(
        rows.into_iter()
            .map(|c| ControllerStatusResponse {
                id: c.id,
                status: c.status,
                config_revision: c.config_revision,
                is_leader: c.is_leader,
                updated_at: c.updated_at,
            })
            .collect(),
    ))
}

pub async fn report_controller(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(id): Path<String>,
    Json(req): Json<ReportControllerStatusRequest>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "status:write")?;
    state
        .store
        .upsert_controller_status(&ns, &id, &req.status, req.config_revision, req.is_leader)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
