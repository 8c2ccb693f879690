use serde::Deserialize;

/// Which authentication scheme issues bearer tokens for interactive users.
/// Independent of the HMAC credential path and the bootstrap bypass, which
/// are always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Oidc,
    Builtin,
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub database_url: String,
    /// 32-byte hex master key used to envelope-encrypt API credential secrets at rest.
    pub master_key: String,
    pub auth_mode: Option<AuthMode>,
    pub oidc: Option<OidcConfig>,
    /// Subjects (`sub` claims, typically emails) auto-granted `is_admin=true`
    /// on first sync, per §3's User invariant.
    pub initial_admin_users: Vec<String>,
    /// Built-in bootstrap admin, created on first startup if no users exist.
    pub builtin_admin_email: Option<String>,
    pub builtin_admin_password: Option<String>,
    /// Retired signing-key grace period in seconds. Default 600 (§3 "grace period").
    pub signing_key_grace_secs: i64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let master_key =
        std::env::var("HERMES_MASTER_KEY").unwrap_or_else(|_| "CHANGE_ME_32_BYTE_HEX_KEY".into());

    if master_key == "CHANGE_ME_32_BYTE_HEX_KEY" {
        let env_mode = std::env::var("HERMES_ENV").unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "HERMES_MASTER_KEY is still the insecure placeholder. \
                 Set a proper 64-char hex key before running in production."
            );
        }
        eprintln!("warning: HERMES_MASTER_KEY not set — using insecure placeholder, do not use in production");
    }

    let auth_mode = match std::env::var("HERMES_AUTH_MODE").ok().as_deref() {
        Some("oidc") => Some(AuthMode::Oidc),
        Some("builtin") => Some(AuthMode::Builtin),
        Some(other) => anyhow::bail!("unknown HERMES_AUTH_MODE: {other}"),
        None => None,
    };

    let oidc = if auth_mode == Some(AuthMode::Oidc) {
        Some(OidcConfig {
            issuer: std::env::var("HERMES_OIDC_ISSUER")
                .map_err(|_| anyhow::anyhow!("HERMES_OIDC_ISSUER required when auth mode is oidc"))?,
            client_id: std::env::var("HERMES_OIDC_CLIENT_ID")
                .map_err(|_| anyhow::anyhow!("HERMES_OIDC_CLIENT_ID required when auth mode is oidc"))?,
            client_secret: std::env::var("HERMES_OIDC_CLIENT_SECRET").unwrap_or_default(),
            redirect_uri: std::env::var("HERMES_OIDC_REDIRECT_URI").unwrap_or_else(|_| {
                "http://localhost:8080/api/auth/token".to_string()
            }),
        })
    } else {
        None
    };

    Ok(Config {
        listen_addr: std::env::var("HERMES_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/hermes".into()),
        master_key,
        auth_mode,
        oidc,
        initial_admin_users: std::env::var("HERMES_INITIAL_ADMIN_USERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        builtin_admin_email: std::env::var("HERMES_BUILTIN_ADMIN_EMAIL").ok(),
        builtin_admin_password: std::env::var("HERMES_BUILTIN_ADMIN_PASSWORD").ok(),
        signing_key_grace_secs: std::env::var("HERMES_SIGNING_KEY_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600),
    })
}
