//! Audit log read (§3 "Change event", reserved `_global` namespace).
//! `_global` holds admin-only audit entries — reading it requires
//! `admin:users` in addition to the ordinary `audit:read` gate.

use std::sync::Arc;

use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::errors::AppError;
use crate::identity::middleware::{require_scope, RequestNamespace};
use crate::identity::Identity;

use super::dto::ChangeEventResponse;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<ChangeEventResponse>>, AppError> {
    require_scope(identity.as_ref(), "audit:read")?;
    if ns == "_global" {
        require_scope(identity.as_ref(), "admin:users")?;
    }
    let rows = state.store.list_audit(&ns, q.limit).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}
