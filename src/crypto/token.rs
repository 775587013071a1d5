// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Encrypted token persistence.
//!
//! The token is a 32-character string the console uses to authenticate
//! command requests to this device. It is generated once, encrypted under
//! the device key with AES-256-GCM, and written to `token.secret`.
//!
//! # On-disk format
//!
//! ```text
//! version(1 byte) || nonce(12 bytes) || ciphertext+tag
//! ```
//!
//! # Self-healing
//!
//! GCM authenticates the ciphertext, so corruption, tampering, or a key
//! change (new MAC address) all fail decryption verifiably instead of
//! yielding garbage. [`TokenStore::get_or_create`] reacts by deleting the
//! record and generating a fresh token — a single bounded retry, never a
//! loop. The operator just pairs the console again.

use std::path::PathBuf;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::device_key::{DeviceIdentity, DeviceKey};
use super::write_secret_file;

/// Length of the printable token handed to the console.
pub const TOKEN_LEN: usize = 32;

/// Format version byte at the start of `token.secret`.
const RECORD_VERSION: u8 = 1;

/// AES-GCM standard nonce length.
const NONCE_LEN: usize = 12;

/// Why a persisted token record could not be loaded.
///
/// Everything except [`TokenLoadError::NotFound`] means the record is
/// unusable and should be discarded; the caller decides to regenerate.
#[derive(Debug, Error)]
pub enum TokenLoadError {
    #[error("token file not found")]
    NotFound,

    #[error("reading token file: {0}")]
    Io(#[from] std::io::Error),

    #[error("token record too short or wrong version")]
    Malformed,

    #[error("token decryption failed (wrong device key or tampered record)")]
    Decrypt,

    #[error("decrypted token is not valid UTF-8")]
    Encoding,
}

/// Owns `token.secret` and the device key that wraps it.
pub struct TokenStore {
    path: PathBuf,
    key: DeviceKey,
    identity: DeviceIdentity,
}

impl TokenStore {
    pub fn new(path: PathBuf, key: DeviceKey, identity: DeviceIdentity) -> Self {
        Self {
            path,
            key,
            identity,
        }
    }

    /// Return the persisted token, or generate, persist, and return a new
    /// one. Idempotent across restarts while the record and key are intact.
    ///
    /// An undecryptable record is deleted and replaced in the same call;
    /// generation itself cannot fail that way, so one retry suffices.
    pub fn get_or_create(&self) -> anyhow::Result<String> {
        match self.load() {
            Ok(token) => Ok(token),
            Err(TokenLoadError::NotFound) => self.generate_and_save(),
            Err(e) => {
                warn!(path = %self.path.display(), "discarding token record: {e}");
                let _ = std::fs::remove_file(&self.path);
                self.generate_and_save()
            }
        }
    }

    /// Decrypt the persisted record with the current device key.
    pub fn load(&self) -> Result<String, TokenLoadError> {
        if !self.path.exists() {
            return Err(TokenLoadError::NotFound);
        }
        let blob = std::fs::read(&self.path)?;

        // version || nonce || at least one block of ciphertext+tag
        if blob.len() < 1 + NONCE_LEN + 16 || blob[0] != RECORD_VERSION {
            return Err(TokenLoadError::Malformed);
        }
        let nonce = Nonce::from_slice(&blob[1..1 + NONCE_LEN]);
        let ciphertext = &blob[1 + NONCE_LEN..];

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()));
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TokenLoadError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| TokenLoadError::Encoding)
    }

    fn generate_and_save(&self) -> anyhow::Result<String> {
        let token = generate_token(&self.identity);
        let record = self.encrypt(token.as_bytes())?;
        write_secret_file(&self.path, &record)?;
        info!(path = %self.path.display(), "new device token generated");
        Ok(token)
    }

    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("token encryption failed: {e}"))?;

        let mut record = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        record.push(RECORD_VERSION);
        record.extend_from_slice(nonce.as_slice());
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }
}

/// `base64(SHA-256(uuid4 + "-" + hostname + "-" + mac))[..32]`.
///
/// The UUID makes the token unique per generation; the hardware identifiers
/// tie it loosely to the device for console-side display purposes.
fn generate_token(identity: &DeviceIdentity) -> String {
    let raw = format!(
        "{}-{}-{}",
        Uuid::new_v4(),
        identity.hostname,
        identity.mac_string()
    );
    let digest = Sha256::digest(raw.as_bytes());
    let mut token = base64::engine::general_purpose::STANDARD.encode(digest);
    token.truncate(TOKEN_LEN);
    token
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            hostname: "test-host".to_string(),
            mac: [0xa4, 0x5e, 0x60, 0xe2, 0x7f, 0x11],
        }
    }

    fn store(dir: &tempfile::TempDir) -> TokenStore {
        let id = identity();
        TokenStore::new(
            dir.path().join("token.secret"),
            DeviceKey::derive(&id),
            id,
        )
    }

    #[test]
    fn generated_token_is_32_printable_chars() {
        let token = generate_token(&identity());
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_graphic()));
    }

    #[test]
    fn two_generated_tokens_differ() {
        // The embedded uuid4 makes collisions effectively impossible.
        assert_ne!(generate_token(&identity()), generate_token(&identity()));
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let t1 = s.get_or_create().unwrap();
        let t2 = s.get_or_create().unwrap();
        assert_eq!(t1, t2, "second call must return the persisted token");
    }

    #[test]
    fn encrypt_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let token = s.get_or_create().unwrap();
        assert_eq!(s.load().unwrap(), token);
    }

    #[test]
    fn plaintext_token_never_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let token = s.get_or_create().unwrap();
        let blob = std::fs::read(dir.path().join("token.secret")).unwrap();
        let needle = token.as_bytes();
        assert!(
            !blob.windows(needle.len()).any(|w| w == needle),
            "token must not appear in the record plaintext"
        );
    }

    #[test]
    fn tampered_record_fails_verifiably() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.get_or_create().unwrap();

        let path = dir.path().join("token.secret");
        let mut blob = std::fs::read(&path).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        std::fs::write(&path, &blob).unwrap();

        assert!(matches!(s.load(), Err(TokenLoadError::Decrypt)));
    }

    #[test]
    fn tampering_triggers_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let original = s.get_or_create().unwrap();

        let path = dir.path().join("token.secret");
        let mut blob = std::fs::read(&path).unwrap();
        blob[20] ^= 0xff;
        std::fs::write(&path, &blob).unwrap();

        let regenerated = s.get_or_create().unwrap();
        assert_ne!(regenerated, original);
        // The fresh record must be stable again.
        assert_eq!(s.get_or_create().unwrap(), regenerated);
    }

    #[test]
    fn wrong_key_fails_and_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let original = s.get_or_create().unwrap();

        // Same file, different hardware → different key.
        let mut other_id = identity();
        other_id.mac[0] ^= 0xff;
        let other = TokenStore::new(
            dir.path().join("token.secret"),
            DeviceKey::derive(&other_id),
            other_id,
        );
        assert!(matches!(other.load(), Err(TokenLoadError::Decrypt)));
        assert_ne!(other.get_or_create().unwrap(), original);
    }

    #[test]
    fn truncated_record_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.get_or_create().unwrap();
        std::fs::write(dir.path().join("token.secret"), [RECORD_VERSION, 1, 2]).unwrap();
        assert!(matches!(s.load(), Err(TokenLoadError::Malformed)));
    }
}
