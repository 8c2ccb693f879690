//! End-to-end HTTP tests against the full router, backed by `MemoryStore`
//! so no Postgres instance is required.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use hermes::app::AppState;
use hermes::config::{AuthMode, Config};
use hermes::store::memory::MemoryStore;
use hermes::store::Store;
use hermes::vault::VaultCrypto;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

const TEST_MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn test_config(auth_mode: Option<AuthMode>) -> Config {
    Config {
        listen_addr: "0.0.0.0:0".to_string(),
        database_url: String::new(),
        master_key: TEST_MASTER_KEY.to_string(),
        auth_mode,
        oidc: None,
        initial_admin_users: Vec::new(),
        builtin_admin_email: None,
        builtin_admin_password: None,
        signing_key_grace_secs: 600,
    }
}

fn test_state(auth_mode: Option<AuthMode>) -> Arc<AppState> {
    Arc::new(AppState {
        store: Arc::new(MemoryStore::default()),
        vault: Arc::new(VaultCrypto::new(TEST_MASTER_KEY).unwrap()),
        config: test_config(auth_mode),
        oidc: None,
    })
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// S1-style scenario: a brand-new namespace with no credentials yet lists
/// empty domains, matching the literal `{"domains": [], "total": 0}` shape.
#[tokio::test]
async fn bootstrap_lists_empty_domains() {
    let state = test_state(None);
    let app = hermes::api::router(state.clone()).with_state(state);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/domains")
                .header("X-Hermes-Namespace", "default")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["domains"], json!([]));
    assert_eq!(body["total"], 0);
}

/// In bootstrap mode (no credentials registered yet) anyone may mint the
/// first credential for a namespace; once one exists, unauthenticated
/// requests are rejected.
#[tokio::test]
async fn bootstrap_allows_first_credential_then_locks_out() {
    let state = test_state(None);
    let app = hermes::api::router(state.clone()).with_state(state.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/credentials")
                .header("X-Hermes-Namespace", "default")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"description": "first", "scopes": ["config:read", "config:write"]})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert!(created["secret_key"].is_string());

    // A second unauthenticated call is now rejected, since the namespace
    // has a credential and the bootstrap bypass no longer applies.
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/credentials")
                .header("X-Hermes-Namespace", "default")
                .header("content-type", "application/json")
                .body(Body::from(json!({"scopes": []}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

/// Creating a domain with `PUT` requires `resource_version`, and a stale
/// version is rejected as a conflict (§4.3 optimistic concurrency).
#[tokio::test]
async fn update_with_stale_resource_version_conflicts() {
    let state = test_state(None);
    state.store.ensure_namespace("default").await.unwrap();
    let app = hermes::api::router(state.clone()).with_state(state.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/domains")
                .header("X-Hermes-Namespace", "default")
                .header("content-type", "application/json")
                .body(Body::from(json!({"name": "example.com", "ttl": 60}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/domains/example.com")
                .header("X-Hermes-Namespace", "default")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"name": "example.com", "ttl": 120, "resource_version": 99}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("refresh and try again"));
}

/// The scopes endpoint exposes the closed scope set, and `whoami` reports
/// `authenticated: false` for a bootstrap (credential-less) caller.
#[tokio::test]
async fn scopes_and_whoami_are_public_shapes() {
    let state = test_state(None);
    let app = hermes::api::router(state.clone()).with_state(state);

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/scopes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let scopes = body_json(resp).await;
    assert!(scopes.as_array().unwrap().iter().any(|s| s == "config:write"));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/whoami")
                .header("X-Hermes-Namespace", "default")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["authenticated"], false);
}

/// `auth/config` reports `enabled: false` when no auth mode is configured,
/// and the mode name when one is.
#[tokio::test]
async fn auth_config_reports_mode() {
    let state = test_state(Some(AuthMode::Builtin));
    let app = hermes::api::router(state.clone()).with_state(state);

    let resp = app
        .oneshot(Request::builder().uri("/api/auth/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["enabled"], true);
    assert_eq!(body["mode"], "builtin");
}

/// Built-in login with a bad password is a uniform 401, no user enumeration.
#[tokio::test]
async fn builtin_login_rejects_bad_password() {
    let state = test_state(Some(AuthMode::Builtin));
    let hash = bcrypt::hash("correct-horse", bcrypt::DEFAULT_COST).unwrap();
    state
        .store
        .create_builtin_user("builtin:a@example.com", "a", "a@example.com", "A", &hash, true)
        .await
        .unwrap();
    let app = hermes::api::router(state.clone()).with_state(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"email": "a@example.com", "password": "wrong"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

/// Namespace name validation: `_global` and upper-case names are rejected
/// even for bootstrap callers.
#[tokio::test]
async fn create_namespace_rejects_reserved_and_invalid_names() {
    let state = test_state(None);
    let app = hermes::api::router(state.clone()).with_state(state.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/namespaces")
                .header("content-type", "application/json")
                .body(Body::from(json!({"name": "_global"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/namespaces")
                .header("content-type", "application/json")
                .body(Body::from(json!({"name": "Team-A"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

/// S2-style scenario: a credential minted in bootstrap mode can sign a
/// request with `HMAC-SHA256`, and the same signature is rejected once
/// replayed with a stale timestamp.
#[tokio::test]
async fn hmac_signed_request_round_trips() {
    let state = test_state(None);
    let app = hermes::api::router(state.clone()).with_state(state.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/credentials")
                .header("X-Hermes-Namespace", "default")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"description": "ci", "scopes": ["config:read"]}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let access_key = created["access_key"].as_str().unwrap().to_string();
    let secret_key = created["secret_key"].as_str().unwrap().to_string();

    let method = "GET";
    let path = "/api/v1/domains";
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let body_hash = hex::encode(Sha256::digest(b""));
    let canonical = format!("{method}\n{path}\n{timestamp}\n{body_hash}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret_key.as_bytes()).unwrap();
    mac.update(canonical.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .header("X-Hermes-Namespace", "default")
                .header("X-Hermes-Timestamp", &timestamp)
                .header(
                    "Authorization",
                    format!("HMAC-SHA256 Credential={access_key},Signature={signature}"),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // A stale timestamp is rejected even with an otherwise-correct signature
    // shape, since the signature itself no longer matches the new canonical
    // string.
    let stale_timestamp = (chrono::Utc::now() - chrono::Duration::hours(1))
        .timestamp()
        .to_string();
    let resp = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .header("X-Hermes-Namespace", "default")
                .header("X-Hermes-Timestamp", &stale_timestamp)
                .header(
                    "Authorization",
                    format!("HMAC-SHA256 Credential={access_key},Signature={signature}"),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

/// S4-style scenario: `config/watch` only returns events newer than the
/// supplied revision, and creating a domain advances `config/revision`.
#[tokio::test]
async fn watch_only_returns_events_after_the_given_revision() {
    let state = test_state(None);
    state.store.ensure_namespace("default").await.unwrap();
    let app = hermes::api::router(state.clone()).with_state(state.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/config/revision")
                .header("X-Hermes-Namespace", "default")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let before = body_json(resp).await;
    let starting_revision = before["revision"].as_i64().unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/domains")
                .header("X-Hermes-Namespace", "default")
                .header("content-type", "application/json")
                .body(Body::from(json!({"name": "watched.example", "ttl": 30}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/config/watch?revision={starting_revision}"))
                .header("X-Hermes-Namespace", "default")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["name"], "watched.example");
    assert!(body["max_revision"].as_i64().unwrap() > starting_revision);

    // Re-watching from the new max revision yields nothing further.
    let max_revision = body["max_revision"].as_i64().unwrap();
    let resp = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/config/watch?revision={max_revision}"))
                .header("X-Hermes-Namespace", "default")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["events"].as_array().unwrap().len(), 0);
}

/// S6-style scenario: rotating the built-in signing key retires the old
/// key with a grace period, but a token signed under it still verifies
/// until the grace period ends — only a brand-new login picks up the new
/// `kid`.
#[tokio::test]
async fn rotate_key_keeps_old_token_valid_during_grace_period() {
    let state = test_state(Some(AuthMode::Builtin));
    let hash = bcrypt::hash("correct-horse", bcrypt::DEFAULT_COST).unwrap();
    state
        .store
        .create_builtin_user("builtin:admin@example.com", "admin", "admin@example.com", "Admin", &hash, true)
        .await
        .unwrap();
    let app = hermes::api::router(state.clone()).with_state(state.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"email": "admin@example.com", "password": "correct-horse"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let old_token = body_json(resp).await["access_token"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/rotate-key")
                .header("Authorization", format!("Bearer {old_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // The old token, signed under the now-retired key, still verifies
    // during the grace period.
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/whoami")
                .header("Authorization", format!("Bearer {old_token}"))
                .header("X-Hermes-Namespace", "default")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["role"], "admin");
}
