//! The `/api/v1` and `/api/auth` HTTP surface (§6). Public routes need no
//! identity; the `/api/v1` nest runs the identity-resolution middleware
//! first and each handler calls [`identity::middleware::require_scope`]
//! as its first line.

pub mod audit;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod dto;
pub mod members;
pub mod namespaces;
pub mod status;
pub mod users;

use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::Json;
use axum::Router;
use serde::Serialize;
use serde_json::json;

use crate::app::AppState;
use crate::identity::{Identity, Source};

/// Builds the full router: public endpoints first, then `/api/v1` nested
/// behind the identity-resolution middleware.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let auth_ctx = state.auth_context();

    let public = Router::new()
        .route("/api/auth/config", get(auth::auth_config))
        .route("/api/auth/login", get(auth::oidc_login).post(auth::builtin_login))
        .route("/api/auth/token", get(auth::oidc_token))
        .route("/api/auth/refresh", post(auth::oidc_refresh))
        .route("/api/v1/scopes", get(auth::scopes));

    let v1 = Router::new()
        .route("/whoami", get(whoami))
        .route("/domains", get(config::list_domains).post(config::create_domain))
        .route(
            "/domains/:name",
            get(config::get_domain)
                .put(config::update_domain)
                .delete(config::delete_domain),
        )
        .route("/domains/:name/history", get(config::domain_history))
        .route("/domains/:name/versions/:v", get(config::domain_version))
        .route("/domains/:name/rollback", post(config::rollback_domain))
        .route("/clusters", get(config::list_clusters).post(config::create_cluster))
        .route(
            "/clusters/:name",
            get(config::get_cluster)
                .put(config::update_cluster)
                .delete(config::delete_cluster),
        )
        .route("/clusters/:name/history", get(config::cluster_history))
        .route("/clusters/:name/versions/:v", get(config::cluster_version))
        .route("/clusters/:name/rollback", post(config::rollback_cluster))
        .route("/config/revision", get(config::current_revision))
        .route("/config/watch", get(config::watch))
        .route("/config/replace", post(config::replace_all))
        .route("/status/instances", get(status::list_instances))
        .route("/status/instances/:id", put(status::report_instance))
        .route("/status/controllers", get(status::list_controllers))
        .route("/status/controllers/:id", put(status::report_controller))
        .route("/audit", get(audit::list_audit))
        .route(
            "/credentials",
            get(credentials::list_credentials).post(credentials::create_credential),
        )
        .route("/credentials/:id", delete(credentials::delete_credential))
        .route("/members", get(members::list_members))
        .route(
            "/members/:sub",
            put(members::upsert_member).delete(members::remove_member),
        )
        .route("/group-bindings", get(members::list_group_bindings))
        .route(
            "/group-bindings/:group",
            put(members::upsert_group_binding).delete(members::remove_group_binding),
        )
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/:sub/password", put(users::set_password))
        .route("/users/:sub", delete(users::delete_user))
        .route("/namespaces", get(namespaces::list_namespaces).post(namespaces::create_namespace))
        .route("/auth/rotate-key", post(auth::rotate_key))
        .route_layer(from_fn_with_state(auth_ctx, crate::identity::middleware::resolve));

    public.nest("/api/v1", v1)
}

#[derive(Debug, Serialize)]
struct WhoamiResponse {
    authenticated: bool,
    subject: Option<String>,
    namespace: Option<String>,
    source: Option<&'static str>,
    role: Option<String>,
    scopes: Vec<String>,
}

/// `GET /api/v1/whoami` — reports the resolved identity, including the
/// effective tenant role (§8 scenario S5: role precedence is observable
/// here). No scope is required beyond having passed the identity
/// middleware; a bootstrap caller (`identity == None`) gets
/// `authenticated: false`.
async fn whoami(
    State(_state): State<Arc<AppState>>,
    Extension(identity): Extension<Option<Identity>>,
) -> Json<serde_json::Value> {
    match identity {
        None => Json(json!(WhoamiResponse {
            authenticated: false,
            subject: None,
            namespace: None,
            source: None,
            role: None,
            scopes: vec![],
        })),
        Some(id) => {
            let source = match id.source {
                Source::Oidc { .. } => "oidc",
                Source::Builtin { .. } => "builtin",
                Source::Hmac { .. } => "hmac",
            };
            let mut scopes: Vec<String> = id.scopes.iter().cloned().collect();
            scopes.sort();
            Json(json!(WhoamiResponse {
                authenticated: true,
                subject: Some(id.subject),
                namespace: Some(id.namespace),
                source: Some(source),
                role: id.role,
                scopes,
            }))
        }
    }
}
