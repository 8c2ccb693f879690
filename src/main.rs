use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod cli;
mod config;
mod errors;
mod identity;
mod jobs;
mod rbac;
mod store;
mod vault;

use app::AppState;
use identity::oidc::OidcVerifier;
use store::postgres::PgStore;
use store::Store;
use vault::VaultCrypto;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hermes=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve) | None => run_server(cfg).await,
        Some(cli::Commands::Credential { command }) => {
            let state = build_state(cfg).await?;
            handle_credential_command(&state, command).await
        }
        Some(cli::Commands::User { command }) => {
            let state = build_state(cfg).await?;
            handle_user_command(&state, command).await
        }
        Some(cli::Commands::Key { command }) => {
            let state = build_state(cfg).await?;
            handle_key_command(&state, command).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn build_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let db = PgStore::connect(&cfg.database_url).await?;
    assemble_state(db, cfg)
}

fn assemble_state(db: PgStore, cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let vault = VaultCrypto::new(&cfg.master_key)?;
    let oidc = cfg.oidc.as_ref().map(|o| {
        Arc::new(OidcVerifier::new(
            o.issuer.clone(),
            o.client_id.clone(),
            o.client_secret.clone(),
            o.redirect_uri.clone(),
        ))
    });

    Ok(Arc::new(AppState {
        store: Arc::new(db),
        vault: Arc::new(vault),
        config: cfg,
        oidc,
    }))
}

async fn run_server(cfg: config::Config) -> anyhow::Result<()> {
    tracing::info!("connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("running migrations...");
    db.migrate().await?;

    let listen_addr = cfg.listen_addr.clone();
    let state = assemble_state(db, cfg)?;

    // Ensure a built-in signing key exists before the first login request
    // arrives — avoids a cold-start race where the first caller bootstraps it.
    if state.config.auth_mode == Some(config::AuthMode::Builtin) {
        identity::builtin::active_key(state.store.as_ref())
            .await
            .context("bootstrapping built-in JWT signing key")?;
        bootstrap_builtin_admin(&state).await?;
    }

    let reaper = Arc::new(jobs::reaper::Reaper::new(state.store.clone()));
    reaper.start();

    let app = api::router(state.clone())
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .with_state(state)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("HERMES_DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-hermes-namespace"),
                    HeaderName::from_static("x-hermes-timestamp"),
                    HeaderName::from_static("x-hermes-body-sha256"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("invalid HERMES_LISTEN_ADDR: {listen_addr}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("hermes control plane listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Creates the configured built-in admin account on first startup, if no
/// user with that email exists yet. Env-configured per §6 "built-in initial
/// admin credentials" — covers the chicken-and-egg problem of standing up
/// built-in auth mode with zero users and no way to log in.
async fn bootstrap_builtin_admin(state: &Arc<AppState>) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (
        state.config.builtin_admin_email.as_ref(),
        state.config.builtin_admin_password.as_ref(),
    ) else {
        return Ok(());
    };

    if state
        .store
        .get_user_by_email(email)
        .await
        .context("looking up built-in admin user")?
        .is_some()
    {
        return Ok(());
    }

    let sub = format!("builtin:{}", email.to_lowercase());
    let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .context("hashing built-in admin password")?;
    state
        .store
        .create_builtin_user(&sub, email, email, "Administrator", &password_hash, true)
        .await
        .context("creating built-in admin user")?;
    tracing::info!(email = %email, "created built-in admin user from HERMES_BUILTIN_ADMIN_EMAIL");
    Ok(())
}

/// Waits for ctrl-c or SIGTERM, then gives in-flight requests 5s to drain
/// (§5 "Shutdown: drain in-flight requests with a 5s grace") before
/// `axum::serve` returns and the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests (5s grace)");
    tokio::time::sleep(Duration::from_secs(5)).await;
}

/// Injects a unique `X-Request-Id` into every response, for correlating
/// client-reported errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.insert(
        "Permissions-Policy",
        "camera=(), microphone=(), geolocation=()".parse().unwrap(),
    );
    headers.remove("Server");

    resp
}

async fn handle_credential_command(
    state: &Arc<AppState>,
    cmd: cli::CredentialCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::CredentialCommands::Create {
            namespace,
            description,
            scopes,
        } => {
            use rand::RngCore;

            for s in &scopes {
                if !rbac::is_valid_scope(s) {
                    anyhow::bail!("unknown scope: {s}");
                }
            }

            state.store.ensure_namespace(&namespace).await?;

            let mut raw = [0u8; 12];
            rand::rngs::OsRng.fill_bytes(&mut raw);
            let access_key = format!("hk_{}", hex::encode(raw));
            let mut secret_raw = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut secret_raw);
            let secret_key = hex::encode(secret_raw);

            let encrypted = state.vault.encrypt_string(&secret_key)?;
            let credential = state
                .store
                .create_credential(&namespace, &access_key, encrypted, &description, scopes)
                .await?;

            println!("Credential created:");
            println!("  ID:          {}", credential.id);
            println!("  Access key:  {}", credential.access_key);
            println!("  Secret key:  {secret_key}  (shown once — store it now)");
        }
        cli::CredentialCommands::List { namespace } => {
            let creds = state.store.list_credentials(&namespace).await?;
            if creds.is_empty() {
                println!("No credentials found.");
            } else {
                println!("{:<38} {:<24} {:<8} SCOPES", "ID", "ACCESS KEY", "ENABLED");
                for c in creds {
                    println!(
                        "{:<38} {:<24} {:<8} {}",
                        c.id,
                        c.access_key,
                        c.enabled,
                        c.scopes.join(",")
                    );
                }
            }
        }
        cli::CredentialCommands::Revoke { namespace, id } => {
            let uuid = uuid::Uuid::parse_str(&id).context("invalid credential id")?;
            let deleted = state.store.delete_credential(&namespace, uuid).await?;
            if deleted {
                println!("Credential revoked.");
            } else {
                println!("Credential not found.");
            }
        }
    }
    Ok(())
}

async fn handle_user_command(state: &Arc<AppState>, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::CreateAdmin {
            email,
            username,
            name,
            password,
        } => {
            let sub = format!("builtin:{}", email.to_lowercase());
            let password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;
            let user = state
                .store
                .create_builtin_user(&sub, &username, &email, &name, &password_hash, true)
                .await?;
            println!("Admin user created: {} ({})", user.sub, user.email);
        }
        cli::UserCommands::SetPassword { sub, password } => {
            let password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;
            state.store.set_password(&sub, &password_hash, true).await?;
            println!("Password updated for {sub}.");
        }
    }
    Ok(())
}

async fn handle_key_command(state: &Arc<AppState>, cmd: cli::KeyCommands) -> anyhow::Result<()> {
    match cmd {
        cli::KeyCommands::Rotate => {
            let key = identity::builtin::rotate(state.store.as_ref(), state.config.signing_key_grace_secs)
                .await?;
            println!("Signing key rotated. New active kid: {}", key.kid);
        }
    }
    Ok(())
}
