//! Identity resolution: a single middleware-facing entry point that turns an
//! incoming request into an optional [`Identity`] (§4.1). Each authentication
//! scheme lives in its own module and yields the same shape; no state is
//! shared between them beyond the process-wide caches each owns.

pub mod builtin;
pub mod hmac;
pub mod middleware;
pub mod oidc;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Claims common to both OIDC and built-in JWTs, after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Where an [`Identity`] came from. Carries only the data that scheme
/// yields — an HMAC identity has no OIDC claims, an OIDC identity has no
/// credential.
#[derive(Debug, Clone)]
pub enum Source {
    Oidc { claims: Claims },
    Builtin { claims: Claims },
    Hmac { credential_id: uuid::Uuid },
}

/// A resolved caller. `None` upstream means bootstrap bypass: no identity,
/// request allowed through `RequireScope` unconditionally.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: String,
    pub namespace: String,
    pub scopes: HashSet<String>,
    pub source: Source,
    /// Effective tenant role, for display/introspection (`whoami`) only —
    /// `require_scope` decides purely on `scopes`. `"admin"` for
    /// `is_admin=true` callers, `owner|editor|viewer` for resolved
    /// member/group roles, `None` when no role applies (HMAC credentials,
    /// or no membership at all).
    pub role: Option<String>,
}

impl Identity {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}
