//! Namespace directory (§3). `namespace:write` is required to register a
//! new tenant; any individual operation's data still lives scoped under
//! its own namespace rows elsewhere.

use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::errors::AppError;
use crate::identity::middleware::require_scope;
use crate::identity::Identity;

const NAMESPACE_RE_HELP: &str =
    "namespace must match ^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$";

fn valid_namespace(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| is_alnum(b) || b == b'-')
}

#[derive(Debug, Deserialize)]
pub struct CreateNamespaceRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct NamespaceResponse {
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_namespaces(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
) -> Result<Json<Vec<NamespaceResponse>>, AppError> {
    require_scope(identity.as_ref(), "namespace:read")?;
    let rows = state.store.list_namespaces().await?;
    Ok(Json(
        rows.into_iter()
            .map(|n| NamespaceResponse {
                name: n.name,
                created_at: n.created_at,
            })
            .collect(),
    ))
}

pub async fn create_namespace(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Json(req): Json<CreateNamespaceRequest>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "namespace:write")?;
    if req.name == "_global" || !valid_namespace(&req.name) {
        return Err(AppError::Validation(NAMESPACE_RE_HELP.to_string()));
    }
    state.store.ensure_namespace(&req.name).await?;
    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        assert!(valid_namespace("default"));
        assert!(valid_namespace("team-a"));
        assert!(valid_namespace("a1"));
    }

    #[test]
    fn rejects_bad_names() {
        assert!(!valid_namespace(""));
        assert!(!valid_namespace("-leading"));
        assert!(!valid_namespace("trailing-"));
        assert!(!valid_namespace("Has_Upper"));
    }
}
