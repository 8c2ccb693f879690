//! Built-in HS256 issuer: login, JWT issuance/verification, and signing-key
//! lifecycle (§4.1). Grounded in the teacher's `rotation.rs` for the
//! transactional rotate-in-one-transaction shape, generalized from TLS
//! certificate rotation to JWT signing-key rotation.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::store::{SigningKey, Store};

use super::Claims as IdentityClaims;

const TOKEN_TTL: ChronoDuration = ChronoDuration::hours(24);
const ISSUER: &str = "hermes-builtin";
const AUDIENCE: &str = "hermes";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BuiltinClaims {
    sub: String,
    preferred_username: String,
    email: String,
    name: String,
    iat: i64,
    exp: i64,
    iss: String,
    aud: String,
}

pub struct LoginResult {
    pub token: String,
    pub must_change_password: bool,
}

/// Bcrypt-compares the supplied password against the stored hash and, on
/// success, issues a signed JWT. Returns a uniform error on any failure —
/// unknown user or bad password look identical to the caller.
pub async fn login(
    store: &dyn Store,
    email: &str,
    password: &str,
) -> Result<LoginResult> {
    const GENERIC_ERR: &str = "invalid email or password";

    let sub = format!("builtin:{}", email.to_lowercase());
    let user = store
        .get_user(&sub)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or_else(|| anyhow!(GENERIC_ERR))?;

    let ok = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
    if !ok {
        return Err(anyhow!(GENERIC_ERR));
    }

    let key = active_key(store).await?;
    let token = issue_token(&key, &user.sub, &user.username, &user.email, &user.name)?;

    store.touch_last_seen(&user.sub).await.ok();

    Ok(LoginResult {
        token,
        must_change_password: user.must_change_password,
    })
}

fn issue_token(
    key: &SigningKey,
    sub: &str,
    preferred_username: &str,
    email: &str,
    name: &str,
) -> Result<String> {
    let now = Utc::now();
    let claims = BuiltinClaims {
        sub: sub.to_string(),
        preferred_username: preferred_username.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        iat: now.timestamp(),
        exp: (now + TOKEN_TTL).timestamp(),
        iss: ISSUER.to_string(),
        aud: AUDIENCE.to_string(),
    };
    let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some(key.kid.clone());
    encode(&header, &claims, &EncodingKey::from_secret(&key.secret))
        .context("signing built-in JWT")
}

/// Returns the active signing key, bootstrapping one if none exists yet.
/// Startup calls this once; later calls should find the bootstrapped key
/// already in place.
pub async fn active_key(store: &dyn Store) -> Result<SigningKey> {
    if let Some(key) = store.active_signing_key().await.map_err(anyhow::Error::from)? {
        return Ok(key);
    }
    bootstrap_key(store).await
}

async fn bootstrap_key(store: &dyn Store) -> Result<SigningKey> {
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    let kid = format!("k-{}", hex::encode(rand_bytes::<8>()));
    store
        .insert_signing_key(&kid, &secret)
        .await
        .map_err(anyhow::Error::from)?;
    store
        .active_signing_key()
        .await
        .map_err(anyhow::Error::from)?
        .ok_or_else(|| anyhow!("signing key vanished immediately after insert"))
}

fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Rotate the active signing key: retire every currently-active row with a
/// grace expiry, mint a new active row, and reap rows past expiry — all in
/// one transaction (delegated to the store implementation).
pub async fn rotate(store: &dyn Store, grace_secs: i64) -> Result<SigningKey> {
    store
        .rotate_signing_keys(grace_secs)
        .await
        .map_err(anyhow::Error::from)
}

/// Verifies a built-in-issued JWT. `kid` selects the signing key if
/// present; otherwise every currently valid key (active + unexpired
/// retired) is tried, matching the "fall back to try all" rule.
pub async fn verify(store: &dyn Store, token: &str) -> Result<IdentityClaims> {
    let header = jsonwebtoken::decode_header(token).context("malformed JWT header")?;
    if header.alg != jsonwebtoken::Algorithm::HS256 {
        return Err(anyhow!("unsupported JWT algorithm: {:?}", header.alg));
    }

    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    validation.set_issuer(&[ISSUER]);

    let candidates: Vec<SigningKey> = if let Some(kid) = &header.kid {
        match store.get_signing_key(kid).await.map_err(anyhow::Error::from)? {
            Some(key) => vec![key],
            None => vec![],
        }
    } else {
        store
            .valid_signing_keys()
            .await
            .map_err(anyhow::Error::from)?
    };

    if candidates.is_empty() {
        return Err(anyhow!("no matching signing key"));
    }

    for key in &candidates {
        let decoding_key = DecodingKey::from_secret(&key.secret);
        if let Ok(data) = decode::<BuiltinClaims>(token, &decoding_key, &validation) {
            let claims = data.claims;
            return Ok(IdentityClaims {
                sub: claims.sub,
                preferred_username: Some(claims.preferred_username),
                email: Some(claims.email),
                name: Some(claims.name),
                groups: Vec::new(),
            });
        }
    }

    Err(anyhow!("JWT signature/claim verification failed"))
}
