//! AES-256-GCM envelope encryption for API credential secrets at rest: a
//! per-secret data-encryption key (DEK), itself encrypted under a single
//! process-wide master key (KEK) derived from `HERMES_MASTER_KEY`.

use aes_gcm::aead::{Aead, KeyInit, OsRng as AesOsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::store::EncryptedSecret;

pub struct VaultCrypto {
    kek: [u8; 32],
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        Ok(Self {
            kek: parse_master_key(master_key_hex)?,
        })
    }

    pub fn encrypt_string(&self, plaintext: &str) -> anyhow::Result<EncryptedSecret> {
        let mut dek = [0u8; 32];
        AesOsRng.fill_bytes(&mut dek);

        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {e:?}"))?;
        let secret_nonce = generate_nonce();
        let encrypted_secret = secret_cipher
            .encrypt(Nonce::from_slice(&secret_nonce), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {e}"))?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {e:?}"))?;
        let dek_nonce = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce), dek.as_ref())
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {e}"))?;

        dek.fill(0);

        Ok(EncryptedSecret {
            encrypted_dek,
            dek_nonce: dek_nonce.to_vec(),
            encrypted_secret,
            secret_nonce: secret_nonce.to_vec(),
        })
    }

    pub fn decrypt_string(&self, blob: &EncryptedSecret) -> anyhow::Result<String> {
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {e:?}"))?;
        let mut dek_bytes = kek_cipher
            .decrypt(Nonce::from_slice(&blob.dek_nonce), blob.encrypted_dek.as_ref())
            .map_err(|e| anyhow::anyhow!("DEK decryption failed: {e}"))?;

        let secret_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("invalid key length: {e:?}"))?;
        let plaintext = secret_cipher
            .decrypt(Nonce::from_slice(&blob.secret_nonce), blob.encrypted_secret.as_ref())
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {e}"))?;

        dek_bytes.fill(0);
        Ok(String::from_utf8(plaintext)?)
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    AesOsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "HERMES_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let crypto =
            VaultCrypto::new("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
                .unwrap();
        let blob = crypto.encrypt_string("sk_live_123456789").unwrap();
        let decrypted = crypto.decrypt_string(&blob).unwrap();
        assert_eq!(decrypted, "sk_live_123456789");
    }

    #[test]
    fn rejects_short_master_key() {
        assert!(VaultCrypto::new("deadbeef").is_err());
    }
}
