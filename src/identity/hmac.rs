//! HMAC request-signing path (§4.1). Canonical string:
//! `METHOD\nREQUEST_PATH\nX-Hermes-Timestamp\nSHA256_HEX(body)`.
//!
//! Header checks (timestamp skew, credential lookup, `enabled`) run before
//! the body is read past its length cap, so a forged signature can't force
//! a full-body buffer for free.

use anyhow::{anyhow, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::store::{ApiCredential, EncryptedSecret, Store};
use crate::vault::VaultCrypto;

const TIMESTAMP_SKEW_SECS: i64 = 5 * 60;
pub const MAX_BODY_BYTES: usize = 1024 * 1024 + 1;

pub struct HmacAuthResult {
    pub credential: ApiCredential,
}

pub struct HmacHeaders<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub access_key: &'a str,
    pub signature_hex: &'a str,
    pub timestamp: &'a str,
    pub body_sha256_header: Option<&'a str>,
}

/// Validates timestamp skew and looks up+enables-checks the credential.
/// Must be called before the request body is buffered past the length cap.
pub async fn check_headers(
    store: &dyn Store,
    headers: &HmacHeaders<'_>,
) -> Result<ApiCredential> {
    let ts: i64 = headers
        .timestamp
        .parse()
        .map_err(|_| anyhow!("invalid X-Hermes-Timestamp"))?;
    let now = Utc::now().timestamp();
    if (now - ts).abs() > TIMESTAMP_SKEW_SECS {
        return Err(anyhow!("X-Hermes-Timestamp outside allowed skew"));
    }

    let (credential, _secret) = store
        .get_credential_by_access_key(headers.access_key)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or_else(|| anyhow!("unknown credential"))?;

    if !credential.enabled {
        return Err(anyhow!("credential disabled"));
    }

    Ok(credential)
}

/// Full verification once the body is available: optional body-hash
/// pre-check, canonical-string construction, and constant-time signature
/// comparison against the credential's decrypted secret key.
pub async fn verify(
    credential: ApiCredential,
    vault: &VaultCrypto,
    encrypted_secret: &EncryptedSecret,
    headers: &HmacHeaders<'_>,
    body: &[u8],
) -> Result<HmacAuthResult> {
    if body.len() > MAX_BODY_BYTES {
        return Err(anyhow!("request body exceeds maximum size"));
    }

    let body_hash = hex::encode(Sha256::digest(body));
    if let Some(claimed) = headers.body_sha256_header {
        if !bool::from(claimed.as_bytes().ct_eq(body_hash.as_bytes())) {
            return Err(anyhow!("X-Hermes-Body-SHA256 does not match body"));
        }
    }

    let canonical = format!(
        "{}\n{}\n{}\n{}",
        headers.method, headers.path, headers.timestamp, body_hash
    );

    let secret_key = vault.decrypt_string(encrypted_secret)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret_key.as_bytes())
        .map_err(|e| anyhow!("invalid HMAC key: {e}"))?;
    mac.update(canonical.as_bytes());
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);

    if !bool::from(
        expected_hex
            .as_bytes()
            .ct_eq(headers.signature_hex.as_bytes()),
    ) {
        return Err(anyhow!("HMAC signature mismatch"));
    }

    Ok(HmacAuthResult { credential })
}
