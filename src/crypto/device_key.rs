// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Device-bound symmetric key derivation.
//!
//! The key is derived from hardware identifiers, not from a stored secret:
//!
//! ```text
//! salt = SHA-256(hostname + "-" + mac_string)
//! key  = PBKDF2-HMAC-SHA256(node_id_be_bytes, salt, 100_000 iterations, 32 bytes)
//! ```
//!
//! Two invocations on the same machine with unchanged hardware produce
//! byte-identical output. If the MAC address changes (reinstalled interface,
//! MAC rotation) the key changes with it and anything wrapped under the old
//! key becomes undecryptable — the token store treats that as expected
//! regeneration, not an error.
//!
//! The derived key is also cached in `key.secret` as URL-safe base64 so
//! repeated startups skip the 100k PBKDF2 iterations. The cache is purely an
//! optimization: an unreadable or malformed cache file is deleted and the key
//! re-derived, never surfaced as a failure.

use std::path::Path;

use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::write_secret_file;

/// Output length of the derivation, sized for AES-256-GCM.
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count. Fixed: changing it changes every derived key.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// The hardware identifiers the key is bound to.
///
/// Read once at startup via [`DeviceIdentity::detect`]; tests construct it
/// directly for deterministic derivation.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub hostname: String,
    pub mac: [u8; 6],
}

impl DeviceIdentity {
    /// Read the ambient identity: network hostname and primary MAC address.
    ///
    /// A machine without a resolvable MAC (containers, exotic interfaces)
    /// falls back to the all-zero address so the agent still runs; the
    /// resulting key is then bound to the hostname alone.
    pub fn detect() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());

        let mac = match mac_address::get_mac_address() {
            Ok(Some(addr)) => addr.bytes(),
            Ok(None) => {
                warn!("no MAC address found; device key will be bound to hostname only");
                [0u8; 6]
            }
            Err(e) => {
                warn!("reading MAC address failed ({e}); falling back to zero address");
                [0u8; 6]
            }
        };

        Self { hostname, mac }
    }

    /// Colon-separated lowercase hex, e.g. `a4:5e:60:e2:7f:11`.
    pub fn mac_string(&self) -> String {
        self.mac
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// The MAC as a 64-bit node id (48 significant bits, high bytes zero).
    fn node_id(&self) -> u64 {
        self.mac.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }
}

/// 32 bytes of device-bound key material.
pub struct DeviceKey([u8; KEY_LEN]);

impl DeviceKey {
    /// Derive the key from the given identity. Deterministic.
    pub fn derive(identity: &DeviceIdentity) -> Self {
        let salt = Sha256::digest(format!("{}-{}", identity.hostname, identity.mac_string()));

        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(
            &identity.node_id().to_be_bytes(),
            &salt,
            PBKDF2_ITERATIONS,
            &mut key,
        );
        DeviceKey(key)
    }

    /// Load the cached key from `path`, or derive and cache it.
    ///
    /// Any read or decode failure of the cache deletes it and falls through
    /// to derivation — the cache can never make startup fail.
    pub fn load_or_derive(path: &Path, identity: &DeviceIdentity) -> anyhow::Result<Self> {
        if path.exists() {
            match Self::load(path) {
                Some(key) => {
                    debug!(path = %path.display(), "device key loaded from cache");
                    return Ok(key);
                }
                None => {
                    warn!(path = %path.display(), "key cache unreadable; re-deriving");
                    let _ = std::fs::remove_file(path);
                }
            }
        }

        let key = Self::derive(identity);
        write_secret_file(path, Self::encode(&key.0).as_bytes())?;
        debug!(path = %path.display(), "device key derived and cached");
        Ok(key)
    }

    fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        let bytes = base64::engine::general_purpose::URL_SAFE
            .decode(text.trim())
            .ok()?;
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(DeviceKey(arr))
    }

    fn encode(bytes: &[u8; KEY_LEN]) -> String {
        base64::engine::general_purpose::URL_SAFE.encode(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
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

    #[test]
    fn derivation_is_deterministic() {
        let id = identity();
        let k1 = DeviceKey::derive(&id);
        let k2 = DeviceKey::derive(&id);
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_hostnames_yield_different_keys() {
        let a = identity();
        let mut b = identity();
        b.hostname = "other-host".to_string();
        assert_ne!(
            DeviceKey::derive(&a).as_bytes(),
            DeviceKey::derive(&b).as_bytes()
        );
    }

    #[test]
    fn different_macs_yield_different_keys() {
        let a = identity();
        let mut b = identity();
        b.mac[5] ^= 0xff;
        assert_ne!(
            DeviceKey::derive(&a).as_bytes(),
            DeviceKey::derive(&b).as_bytes()
        );
    }

    #[test]
    fn mac_string_is_colon_hex() {
        assert_eq!(identity().mac_string(), "a4:5e:60:e2:7f:11");
    }

    #[test]
    fn cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.secret");
        let id = identity();
        let k1 = DeviceKey::load_or_derive(&path, &id).unwrap();
        assert!(path.exists());
        let k2 = DeviceKey::load_or_derive(&path, &id).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn corrupt_cache_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.secret");
        std::fs::write(&path, b"not base64 at all!!").unwrap();
        let id = identity();
        let key = DeviceKey::load_or_derive(&path, &id).unwrap();
        // The rewritten cache must now load cleanly and match the derivation.
        assert_eq!(key.as_bytes(), DeviceKey::derive(&id).as_bytes());
        let reloaded = DeviceKey::load_or_derive(&path, &id).unwrap();
        assert_eq!(reloaded.as_bytes(), key.as_bytes());
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let key = DeviceKey::derive(&identity());
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(&hex_str(key.as_bytes())));
    }

    fn hex_str(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
