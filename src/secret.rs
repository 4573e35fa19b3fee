//! Secret encryption for chain configuration.
//!
//! Values under the `secrets` configuration entry are stored as
//! hex(nonce || AES-256-GCM ciphertext), keyed by a SHA-256 digest of
//! the engine's secret-key string. Decryption failure is never fatal:
//! the entry is passed through verbatim so a misconfigured key degrades
//! to ciphertext values instead of a dead chain.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const NONCE_LEN: usize = 12;

fn derive_key(secret_key: &str) -> Key<Aes256Gcm> {
    let mut hasher = Sha256::new();
    hasher.update(secret_key.as_bytes());
    *Key::<Aes256Gcm>::from_slice(&hasher.finalize())
}

pub fn encrypt(plaintext: &str, secret_key: &str) -> Result<String> {
    let cipher = Aes256Gcm::new(&derive_key(secret_key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("encryption failed: {e}"))?;

    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(hex::encode(out))
}

pub fn decrypt(ciphertext: &str, secret_key: &str) -> Result<String> {
    let raw = hex::decode(ciphertext)?;
    if raw.len() < NONCE_LEN {
        bail!("ciphertext too short");
    }
    let (nonce, body) = raw.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(&derive_key(secret_key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|_| anyhow!("decryption failed"))?;
    Ok(String::from_utf8(plaintext)?)
}

/// Decrypts every entry of a `secrets` map, passing entries through
/// verbatim when no key is configured or decryption fails.
pub fn decrypt_all(
    secrets: HashMap<String, String>,
    secret_key: Option<&str>,
) -> HashMap<String, String> {
    let Some(key) = secret_key else {
        return secrets;
    };
    secrets
        .into_iter()
        .map(|(name, value)| match decrypt(&value, key) {
            Ok(plaintext) => (name, plaintext),
            Err(_) => (name, value),
        })
        .collect()
}
