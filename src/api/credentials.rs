//! API credential management (§3 "API credential", §4.1 bootstrap). Any
//! caller in bootstrap mode, or any caller holding `credential:write`,
//! may mint the first credential in a namespace.

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::errors::AppError;
use crate::identity::middleware::{require_scope, RequestNamespace};
use crate::identity::Identity;
use crate::rbac::is_valid_scope;

#[derive(Debug, Deserialize)]
pub struct CreateCredentialRequest {
    #[serde(default)]
    pub description: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCredentialResponse {
    pub id: uuid::Uuid,
    pub access_key: String,
    pub secret_key: String,
    pub description: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub id: uuid::Uuid,
    pub access_key: String,
    pub description: String,
    pub scopes: Vec<String>,
    pub enabled: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<Vec<CredentialResponse>>, AppError> {
    require_scope(identity.as_ref(), "credential:read")?;
    let rows = state.store.list_credentials(&ns).await?;
    Ok(Json(
        rows.into_iter()
            .map(|c| CredentialResponse {
                id: c.id,
                access_key: c.access_key,
                description: c.description,
                scopes: c.scopes,
                enabled: c.enabled,
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect(),
    ))
}

/// `POST /api/v1/credentials` — mintable by a `credential:write` holder,
/// or by anyone in bootstrap mode (identity is `None`), since that's the
/// only way the first credential in a namespace comes into existence.
pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Json(req): Json<CreateCredentialRequest>,
) -> Result<(StatusCode, Json<CreateCredentialResponse>), AppError> {
    require_scope(identity.as_ref(), "credential:write")?;

    for s in &req.scopes {
        if !is_valid_scope(s) {
            return Err(AppError::Validation(format!("unknown scope: {s}")));
        }
    }

    state.store.ensure_namespace(&ns).await?;

    let access_key = format!("hk_{}", hex::encode(rand_bytes::<12>()));
    let secret_key = hex::encode(rand_bytes::<32>());
    let encrypted = state
        .vault
        .encrypt_string(&secret_key)
        .map_err(AppError::Internal)?;

    let credential = state
        .store
        .create_credential(&ns, &access_key, encrypted, &req.description, req.scopes)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateCredentialResponse {
            id: credential.id,
            access_key: credential.access_key,
            secret_key,
            description: credential.description,
            scopes: credential.scopes,
        }),
    ))
}

pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(id): Path<uuid::Uuid>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "credential:write")?;
    let deleted = state.store.delete_credential(&ns, id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}
