//! Encrypted credential files and the provider injected into the fetcher.
//!
//! Each of `Settings/login.dat`, `password.dat`, `pat_token.dat` holds one
//! AES-256-GCM ciphertext (12-byte nonce prepended) under the base64 key from
//! the matching environment variable. A missing or undecryptable file
//! degrades the authentication chain instead of failing startup.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::Path;
use tracing::warn;

use crate::config::Config;

const NONCE_LEN: usize = 12;

/// Decrypted platform credentials, read once at startup.
#[derive(Clone, Default)]
pub struct CredentialProvider {
    pub login: Option<String>,
    pub password: Option<String>,
    pub pat: Option<String>,
}

impl CredentialProvider {
    /// Load whatever credentials are present. Absent keys or files are logged
    /// and skipped; the fetcher's auth chain adapts to what is available.
    pub fn load(config: &Config) -> CredentialProvider {
        let read = |name: &str, file: &str, key: &Option<String>| -> Option<String> {
            let key = key.as_deref()?;
            let path = config.settings_dir.join(file);
            match decrypt_from_file(&path, key) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(credential = name, error = %e, "Credential unavailable");
                    None
                }
            }
        };

        CredentialProvider {
            login: read("login", "login.dat", &config.login_key),
            password: read("password", "password.dat", &config.password_key),
            pat: read("pat", "pat_token.dat", &config.pat_key),
        }
    }

    pub fn has_basic_pair(&self) -> bool {
        self.login.is_some() && self.password.is_some()
    }
}

fn cipher_from_key(key_b64: &str) -> Result<Aes256Gcm> {
    let key_bytes = BASE64.decode(key_b64).context("decoding base64 key")?;
    if key_bytes.len() != 32 {
        bail!("key must be 32 bytes, got {}", key_bytes.len());
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)))
}

/// Decrypt a nonce-prefixed ciphertext file into UTF-8 text.
pub fn decrypt_from_file(path: &Path, key_b64: &str) -> Result<String> {
    let blob = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if blob.len() <= NONCE_LEN {
        bail!("ciphertext too short in {}", path.display());
    }
    let cipher = cipher_from_key(key_b64)?;
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let plain = cipher
        .decrypt(nonce, &blob[NONCE_LEN..])
        .map_err(|_| anyhow!("decryption failed for {}", path.display()))?;
    String::from_utf8(plain).context("credential is not valid UTF-8")
}

/// Encrypt `text` under the base64 key and write it nonce-prefixed to `path`.
pub fn encrypt_to_file(text: &str, path: &Path, key_b64: &str) -> Result<()> {
    let cipher = cipher_from_key(key_b64)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, text.as_bytes())
        .map_err(|_| anyhow!("encryption failed"))?;
    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);
    std::fs::write(path, blob).with_context(|| format!("writing {}", path.display()))
}
