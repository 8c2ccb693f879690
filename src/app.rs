//! Process-wide shared state, constructed once at startup and handed to
//! every handler via `Arc<AppState>` (§5 "Global mutable state: only two
//! items are process-wide — the DB pool and the JWKS/key caches").

use std::sync::Arc;

use crate::config::Config;
use crate::identity::middleware::AuthContext;
use crate::identity::oidc::OidcVerifier;
use crate::store::Store;
use crate::vault::VaultCrypto;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub vault: Arc<VaultCrypto>,
    pub config: Config,
    pub oidc: Option<Arc<OidcVerifier>>,
}

impl AppState {
    /// Builds the `AuthContext` the identity middleware runs against.
    /// Cheap — it only clones `Arc`s and a handful of strings — but not
    /// free, so callers construct it once at startup rather than per
    /// request.
    pub fn auth_context(&self) -> Arc<AuthContext> {
        Arc::new(AuthContext {
            store: self.store.clone(),
            vault: self.vault.clone(),
            auth_mode: self.config.auth_mode,
            oidc: self.oidc.clone(),
            initial_admin_users: self.config.initial_admin_users.clone(),
        })
    }
}
