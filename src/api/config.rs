//! Versioned config store handlers (§4.3, §4.4): domains, clusters,
//! history/version/rollback, the change-feed watch, and replace-all.
//!
//! Domains and clusters share every operation's shape — only the
//! `EntityKind` differs — so each route is a thin wrapper around a
//! generic `*_impl` function, mirroring how the teacher's `api/handlers.rs`
//! keeps the HTTP-facing function short and pushes logic into the shared
//! body.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::app::AppState;
use crate::errors::AppError;
use crate::identity::middleware::{require_scope, RequestNamespace};
use crate::identity::Identity;
use crate::store::{ChangeAction, EntityKind};

use super::dto::{
    ChangeEventResponse, ConfigEntityResponse, HistoryEntryResponse, ListItems, ListResponse,
    ReplaceAllRequest, RollbackRequest, WatchQuery,
};

fn operator_of(identity: &Option<Identity>) -> String {
    match identity {
        Some(id) => id.subject.clone(),
        None => "bootstrap".to_string(),
    }
}

async fn list_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
) -> Result<Json<ListResponse<ConfigEntityResponse>>, AppError> {
    let rows = state.store.list(ns, kind).await?;
    let total = rows.len();
    let items: Vec<ConfigEntityResponse> = rows.into_iter().map(Into::into).collect();
    let list_items = match kind {
        EntityKind::Domain => ListItems {
            domains: Some(items),
            clusters: None,
        },
        EntityKind::Cluster => ListItems {
            domains: None,
            clusters: Some(items),
        },
    };
    Ok(Json(ListResponse {
        total,
        items: list_items,
    }))
}

pub async fn list_domains(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<ListResponse<ConfigEntityResponse>>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    list_impl(&state, &ns, EntityKind::Domain).await
}

pub async fn list_clusters(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<ListResponse<ConfigEntityResponse>>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    list_impl(&state, &ns, EntityKind::Cluster).await
}

async fn get_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
    name: &str,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    let entity = state.store.get(ns, kind, name).await?;
    Ok(Json(entity.into()))
}

pub async fn get_domain(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    get_impl(&state, &ns, EntityKind::Domain, &name).await
}

pub async fn get_cluster(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    get_impl(&state, &ns, EntityKind::Cluster, &name).await
}

/// `POST /domains` / `POST /clusters` — create. The request body is the
/// entity's opaque payload; `name` is read out of it since the store
/// treats everything else as content-agnostic (§3).
async fn create_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
    operator: String,
    payload: serde_json::Value,
) -> Result<(StatusCode, Json<ConfigEntityResponse>), AppError> {
    let name = payload
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("payload must have a string \"name\" field".into()))?
        .to_string();

    state.store.ensure_namespace(ns).await?;
    let entity = state
        .store
        .put(ns, kind, &name, payload, ChangeAction::Create, &operator, 0)
        .await?;
    Ok((StatusCode::CREATED, Json(entity.into())))
}

pub async fn create_domain(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<ConfigEntityResponse>), AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    create_impl(&state, &ns, EntityKind::Domain, operator_of(&identity), payload).await
}

pub async fn create_cluster(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<ConfigEntityResponse>), AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    create_impl(&state, &ns, EntityKind::Cluster, operator_of(&identity), payload).await
}

/// `PUT /domains/:name` / `PUT /clusters/:name` — update with optimistic
/// concurrency. The body must carry `resource_version`, compared against
/// the live row; mismatch is a `conflict` (§4.3).
async fn update_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
    name: &str,
    operator: String,
    payload: serde_json::Value,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    let expected_version = payload
        .get("resource_version")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| AppError::Validation("payload must have an integer \"resource_version\" field".into()))?;

    let entity = state
        .store
        .put(ns, kind, name, payload, ChangeAction::Update, &operator, expected_version)
        .await?;
    Ok(Json(entity.into()))
}

pub async fn update_domain(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    update_impl(&state, &ns, EntityKind::Domain, &name, operator_of(&identity), payload).await
}

pub async fn update_cluster(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    update_impl(&state, &ns, EntityKind::Cluster, &name, operator_of(&identity), payload).await
}

async fn delete_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
    name: &str,
    operator: String,
) -> Result<StatusCode, AppError> {
    state.store.delete(ns, kind, name, &operator).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_domain(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    delete_impl(&state, &ns, EntityKind::Domain, &name, operator_of(&identity)).await
}

pub async fn delete_cluster(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    delete_impl(&state, &ns, EntityKind::Cluster, &name, operator_of(&identity)).await
}

async fn history_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
    name: &str,
) -> Result<Json<Vec<HistoryEntryResponse>>, AppError> {
    let rows = state.store.history(ns, kind, name).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn domain_history(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
) -> Result<Json<Vec<HistoryEntryResponse>>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    history_impl(&state, &ns, EntityKind::Domain, &name).await
}

pub async fn cluster_history(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
) -> Result<Json<Vec<HistoryEntryResponse>>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    history_impl(&state, &ns, EntityKind::Cluster, &name).await
}

async fn version_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
    name: &str,
    v: i64,
) -> Result<Json<HistoryEntryResponse>, AppError> {
    let row = state.store.version(ns, kind, name, v).await?;
    Ok(Json(row.into()))
}

pub async fn domain_version(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path((name, v)): Path<(String, i64)>,
) -> Result<Json<HistoryEntryResponse>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    version_impl(&state, &ns, EntityKind::Domain, &name, v).await
}

pub async fn cluster_version(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path((name, v)): Path<(String, i64)>,
) -> Result<Json<HistoryEntryResponse>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    version_impl(&state, &ns, EntityKind::Cluster, &name, v).await
}

async fn rollback_impl(
    state: &AppState,
    ns: &str,
    kind: EntityKind,
    name: &str,
    operator: String,
    v: i64,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    let entity = state.store.rollback(ns, kind, name, v, &operator).await?;
    Ok(Json(entity.into()))
}

pub async fn rollback_domain(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    rollback_impl(&state, &ns, EntityKind::Domain, &name, operator_of(&identity), req.version).await
}

pub async fn rollback_cluster(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Path(name): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<ConfigEntityResponse>, AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    rollback_impl(&state, &ns, EntityKind::Cluster, &name, operator_of(&identity), req.version).await
}

pub async fn current_revision(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_scope(identity.as_ref(), "config:read")?;
    let revision = state.store.current_revision(&ns).await?;
    Ok(Json(json!({ "revision": revision })))
}

pub async fn watch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Query(q): Query<WatchQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_scope(identity.as_ref(), "config:watch")?;
    let (events, max_revision) = state.store.watch_from(&ns, q.revision).await?;
    let events: Vec<ChangeEventResponse> = events.into_iter().map(Into::into).collect();
    Ok(Json(json!({ "events": events, "max_revision": max_revision })))
}

/// `POST /config/replace` — atomically replaces every domain and cluster
/// row for the namespace (§4.3 "Replace-all semantics"). Per the Open
/// Question resolution in `DESIGN.md`, removed rows emit a `delete`
/// change-log event so watchers aren't left stale.
pub async fn replace_all(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
    Extension(RequestNamespace(ns)): Extension<RequestNamespace>,
    Json(req): Json<ReplaceAllRequest>,
) -> Result<StatusCode, AppError> {
    require_scope(identity.as_ref(), "config:write")?;
    let operator = operator_of(&identity);

    let named = |field: &'static str, values: Vec<serde_json::Value>| -> Result<Vec<(String, serde_json::Value)>, AppError> {
        values
            .into_iter()
            .map(|v| {
                let name = v
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| AppError::Validation(format!("each {field} entry must have a string \"name\" field")))?
                    .to_string();
                Ok((name, v))
            })
            .collect()
    };

    let domains = named("domains", req.domains)?;
    let clusters = named("clusters", req.clusters)?;

    state.store.replace_all(&ns, domains, clusters, &operator).await?;
    Ok(StatusCode::NO_CONTENT)
}
