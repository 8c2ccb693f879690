//! Namespace extraction, scheme dispatch, and the scope gate (§4.1). A
//! single middleware resolves an `Option<Identity>` and attaches it to the
//! request; handlers call [`require_scope`] as their first line.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::config::AuthMode;
use crate::errors::AppError;
use crate::rbac;
use crate::store::{ApiCredential, Store};
use crate::vault::VaultCrypto;

use super::{builtin, hmac, oidc::OidcVerifier, Claims, Identity, Source};

/// Shared state the identity resolver needs, independent of the rest of
/// `AppState` so it can be unit tested on its own.
pub struct AuthContext {
    pub store: Arc<dyn Store>,
    pub vault: Arc<VaultCrypto>,
    pub auth_mode: Option<AuthMode>,
    pub oidc: Option<Arc<OidcVerifier>>,
    pub initial_admin_users: Vec<String>,
}

/// Request-extension wrapper for the resolved namespace, attached before
/// authentication runs.
#[derive(Debug, Clone)]
pub struct RequestNamespace(pub String);

fn extract_namespace(req: &Request) -> String {
    if let Some(v) = req
        .headers()
        .get("X-Hermes-Namespace")
        .and_then(|v| v.to_str().ok())
    {
        return v.to_string();
    }
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(v) = pair.strip_prefix("namespace=") {
                return v.to_string();
            }
        }
    }
    "default".to_string()
}

pub async fn resolve(
    State(ctx): State<Arc<AuthContext>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let namespace = extract_namespace(&req);
    req.extensions_mut().insert(RequestNamespace(namespace.clone()));

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let identity: Option<Identity> = match auth_header {
        Some(h) if h.starts_with("Bearer ") => {
            let token = h.trim_start_matches("Bearer ").to_string();
            Some(resolve_bearer(&ctx, &namespace, &token).await?)
        }
        Some(h) if h.starts_with("HMAC-SHA256 ") => {
            let (identity, rebuilt) = resolve_hmac(&ctx, &h, req).await?;
            req = rebuilt;
            Some(identity)
        }
        Some(_) => return Err(AppError::Unauthenticated),
        None => {
            let count = ctx
                .store
                .credentials_count(&namespace)
                .await
                .map_err(AppError::from)?;
            if count == 0 {
                None
            } else {
                return Err(AppError::Unauthenticated);
            }
        }
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// `identity == None` is bootstrap — always allowed. Otherwise the scope
/// must be present on the resolved identity.
pub fn require_scope(identity: Option<&Identity>, scope: &str) -> Result<(), AppError> {
    match identity {
        None => Ok(()),
        Some(id) if id.has_scope(scope) => Ok(()),
        Some(_) => Err(AppError::Unauthorized),
    }
}

async fn resolve_bearer(
    ctx: &AuthContext,
    namespace: &str,
    token: &str,
) -> Result<Identity, AppError> {
    match ctx.auth_mode {
        Some(AuthMode::Oidc) => {
            let verifier = ctx
                .oidc
                .as_ref()
                .ok_or_else(|| AppError::Internal(anyhow!("OIDC auth mode configured without issuer")))?;
            let claims = verifier
                .verify(token)
                .await
                .map_err(|_| AppError::Unauthenticated)?;
            oidc_identity(ctx, namespace, claims).await
        }
        Some(AuthMode::Builtin) => {
            let claims = builtin::verify(ctx.store.as_ref(), token)
                .await
                .map_err(|_| AppError::Unauthenticated)?;
            builtin_identity(ctx, namespace, claims).await
        }
        None => Err(AppError::Unauthenticated),
    }
}

/// OIDC claims trigger JIT user provisioning on every request — `sub`,
/// `email`, `name` sync to the `users` row, with `is_admin` only ever set
/// true on first insert (§3).
async fn oidc_identity(
    ctx: &AuthContext,
    namespace: &str,
    claims: Claims,
) -> Result<Identity, AppError> {
    let email = claims.email.clone().unwrap_or_default();
    let username = claims
        .preferred_username
        .clone()
        .unwrap_or_else(|| email.clone());
    let name = claims.name.clone().unwrap_or_default();
    let is_admin_on_insert = ctx
        .initial_admin_users
        .iter()
        .any(|a| a.eq_ignore_ascii_case(&email));

    let user = ctx
        .store
        .upsert_oidc_user(&claims.sub, &username, &email, &name, is_admin_on_insert)
        .await
        .map_err(AppError::from)?;

    let (scopes, role) =
        resolve_scopes(ctx, namespace, user.is_admin, &claims.sub, &claims.groups).await?;

    Ok(Identity {
        subject: claims.sub.clone(),
        namespace: namespace.to_string(),
        scopes,
        source: Source::Oidc { claims },
        role,
    })
}

async fn builtin_identity(
    ctx: &AuthContext,
    namespace: &str,
    claims: Claims,
) -> Result<Identity, AppError> {
    let user = ctx
        .store
        .get_user(&claims.sub)
        .await
        .map_err(AppError::from)?
        .ok_or(AppError::Unauthenticated)?;

    let (scopes, role) =
        resolve_scopes(ctx, namespace, user.is_admin, &claims.sub, &claims.groups).await?;

    Ok(Identity {
        subject: claims.sub.clone(),
        namespace: namespace.to_string(),
        scopes,
        source: Source::Builtin { claims },
        role,
    })
}

/// Resolves both the scope set `require_scope` checks and the display-only
/// role label `whoami` reports (§4.2, §8 scenario S5).
async fn resolve_scopes(
    ctx: &AuthContext,
    namespace: &str,
    is_admin: bool,
    sub: &str,
    groups: &[String],
) -> Result<(HashSet<String>, Option<String>), AppError> {
    if is_admin {
        return Ok((rbac::admin_scopes(), Some("admin".to_string())));
    }
    let direct = ctx
        .store
        .get_member_role(namespace, sub)
        .await
        .map_err(AppError::from)?;
    let group_roles = ctx
        .store
        .group_roles_for(namespace, groups)
        .await
        .map_err(AppError::from)?;
    match rbac::effective_role(direct, &group_roles) {
        Some(role) => Ok((rbac::role_to_scopes(role), Some(role.as_str().to_string()))),
        None => Ok((HashSet::new(), None)),
    }
}

fn parse_hmac_header(rest: &str) -> Option<(String, String)> {
    let mut access_key = None;
    let mut signature = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("Credential=") {
            access_key = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("Signature=") {
            signature = Some(v.to_string());
        }
    }
    Some((access_key?, signature?))
}

async fn resolve_hmac(
    ctx: &AuthContext,
    header_value: &str,
    req: Request,
) -> Result<(Identity, Request), AppError> {
    let rest = header_value.trim_start_matches("HMAC-SHA256 ");
    let (access_key, signature_hex) =
        parse_hmac_header(rest).ok_or(AppError::Unauthenticated)?;

    let timestamp = req
        .headers()
        .get("X-Hermes-Timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthenticated)?
        .to_string();
    let body_sha_header = req
        .headers()
        .get("X-Hermes-Body-SHA256")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let headers = hmac::HmacHeaders {
        method: &method,
        path: &path,
        access_key: &access_key,
        signature_hex: &signature_hex,
        timestamp: &timestamp,
        body_sha256_header: body_sha_header.as_deref(),
    };

    let credential: ApiCredential = hmac::check_headers(ctx.store.as_ref(), &headers)
        .await
        .map_err(|_| AppError::Unauthenticated)?;

    let (_, encrypted_secret) = ctx
        .store
        .get_credential_by_access_key(&access_key)
        .await
        .map_err(AppError::from)?
        .ok_or(AppError::Unauthenticated)?;

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, hmac::MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::Validation("request body exceeds maximum size".to_string()))?;

    let result = hmac::verify(credential, &ctx.vault, &encrypted_secret, &headers, &bytes)
        .await
        .map_err(|_| AppError::Unauthenticated)?;

    let identity = Identity {
        subject: format!("credential:{}", result.credential.access_key),
        namespace: result.credential.namespace.clone(),
        scopes: result.credential.scopes.iter().cloned().collect(),
        source: Source::Hmac {
            credential_id: result.credential.id,
        },
        role: None,
    };

    let rebuilt = Request::from_parts(parts, Body::from(bytes));
    Ok((identity, rebuilt))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::rbac::Role;
    use crate::store::memory::MemoryStore;

    use super::*;

    fn test_ctx() -> AuthContext {
        AuthContext {
            store: Arc::new(MemoryStore::default()),
            vault: Arc::new(VaultCrypto::new(
                "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
            ).unwrap()),
            auth_mode: None,
            oidc: None,
            initial_admin_users: Vec::new(),
        }
    }

    fn claims(sub: &str, groups: &[&str]) -> Claims {
        Claims {
            sub: sub.to_string(),
            preferred_username: None,
            email: None,
            name: None,
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// §8 scenario S5: a direct `owner` membership outranks the `viewer`
    /// role a group binding would otherwise grant; once the direct
    /// membership is removed, the group role takes over.
    #[tokio::test]
    async fn group_role_applies_only_once_direct_membership_is_gone() {
        let ctx = test_ctx();
        ctx.store.ensure_namespace("default").await.unwrap();
        ctx.store.upsert_member("default", "alice", Role::Owner).await.unwrap();
        ctx.store
            .upsert_group_binding("default", "devs", Role::Viewer)
            .await
            .unwrap();

        let identity = oidc_identity(&ctx, "default", claims("alice", &["devs"]))
            .await
            .unwrap();
        assert_eq!(identity.role.as_deref(), Some("owner"));
        assert!(identity.has_scope("config:write"));

        ctx.store.remove_member("default", "alice").await.unwrap();

        let identity = oidc_identity(&ctx, "default", claims("alice", &["devs"]))
            .await
            .unwrap();
        assert_eq!(identity.role.as_deref(), Some("viewer"));
        assert!(!identity.has_scope("config:write"));
        assert!(identity.has_scope("config:read"));
    }

    /// No direct membership and no matching group binding resolves to no
    /// role and an empty scope set, not an error.
    #[tokio::test]
    async fn no_membership_or_group_binding_yields_no_role() {
        let ctx = test_ctx();
        ctx.store.ensure_namespace("default").await.unwrap();

        let identity = oidc_identity(&ctx, "default", claims("bob", &["nobody"]))
            .await
            .unwrap();
        assert_eq!(identity.role, None);
        assert!(identity.scopes.is_empty());
    }
}
