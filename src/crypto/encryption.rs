//! Field cipher: AES-256-GCM tokens
//!
//! A token is self-describing:
//!
//! ```text
//! +---------+----------------+-----------+---------------------------+
//! | version | timestamp (BE) | nonce     | ciphertext || GCM tag    |
//! | 1 byte  | 8 bytes        | 12 bytes  | n + 16 bytes              |
//! +---------+----------------+-----------+---------------------------+
//! ```
//!
//! The version byte and timestamp are bound in as associated data, so the
//! tag covers nonce, ciphertext, version and timestamp. Every encode draws a
//! fresh random nonce.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CofferError, CofferResult};
use crate::keys::KeyMaterial;

use super::key_derivation::derive_key;

/// Token format marker
pub const TOKEN_VERSION: u8 = 0x81;

/// Size of the AES-GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag
const TAG_SIZE: usize = 16;
/// Version byte plus timestamp
const HEADER_SIZE: usize = 1 + 8;
/// Shortest possible token (empty plaintext)
pub const MIN_TOKEN_LEN: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// Authenticated encryption bound to one key version
///
/// Construction derives the cipher key once, with the KDF cost recorded in
/// the key's metadata; encode and decode then do no I/O and no key
/// derivation.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
    key_version: u32,
}

impl FieldCipher {
    /// Build a cipher for `material`
    pub fn new(material: &KeyMaterial) -> CofferResult<Self> {
        let derived = derive_key(material, material.kdf())?;
        let cipher = Aes256Gcm::new_from_slice(derived.as_bytes())
            .map_err(|e| CofferError::Encryption(format!("Failed to create cipher: {}", e)))?;
        Ok(Self {
            cipher,
            key_version: material.version(),
        })
    }

    /// Version of the key material this cipher was built from
    pub fn key_version(&self) -> u32 {
        self.key_version
    }

    /// Encrypt `plaintext` into a token
    pub fn encode(&self, plaintext: &[u8]) -> CofferResult<Vec<u8>> {
        self.encode_at(plaintext, Utc::now())
    }

    fn encode_at(&self, plaintext: &[u8], timestamp: DateTime<Utc>) -> CofferResult<Vec<u8>> {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = TOKEN_VERSION;
        header[1..].copy_from_slice(&timestamp.timestamp().to_be_bytes());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|e| CofferError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut token = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + ciphertext.len());
        token.extend_from_slice(&header);
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(token)
    }

    /// Verify and decrypt a token
    ///
    /// Any failure (wrong key, tampering, truncation, unknown version) is
    /// reported as [`CofferError::Authentication`].
    pub fn decode(&self, token: &[u8]) -> CofferResult<Vec<u8>> {
        if token.len() < MIN_TOKEN_LEN || token[0] != TOKEN_VERSION {
            return Err(CofferError::Authentication);
        }

        let (header, rest) = token.split_at(HEADER_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| CofferError::Authentication)
    }

    /// Encrypt a string into URL-safe base64 text
    pub fn encode_str(&self, plaintext: &str) -> CofferResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.encode(plaintext.as_bytes())?))
    }

    /// Decrypt text produced by [`encode_str`](Self::encode_str)
    pub fn decode_str(&self, token: &str) -> CofferResult<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| CofferError::Authentication)?;
        let plaintext = self.decode(&raw)?;
        String::from_utf8(plaintext)
            .map_err(|e| CofferError::Encryption(format!("Invalid UTF-8 in decrypted data: {}", e)))
    }

    /// Encrypt a structured value
    ///
    /// The value is first converted to a `serde_json::Value`, whose maps are
    /// key-ordered, so equal mappings always serialize to the same bytes.
    pub fn encode_value<T: Serialize + ?Sized>(&self, value: &T) -> CofferResult<Vec<u8>> {
        let canonical = serde_json::to_value(value)?;
        self.encode(&serde_json::to_vec(&canonical)?)
    }

    /// Decrypt a structured value produced by [`encode_value`](Self::encode_value)
    pub fn decode_value<T: DeserializeOwned>(&self, token: &[u8]) -> CofferResult<T> {
        let plaintext = self.decode(token)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

// Never print cipher state
impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("key_version", &self.key_version)
            .finish_non_exhaustive()
    }
}

/// Unauthenticated creation time recorded in a token
///
/// Informational only; the value is trustworthy only after the token has
/// decoded successfully.
pub fn token_timestamp(token: &[u8]) -> Option<DateTime<Utc>> {
    if token.len() < HEADER_SIZE || token[0] != TOKEN_VERSION {
        return None;
    }
    let mut secs = [0u8; 8];
    secs.copy_from_slice(&token[1..HEADER_SIZE]);
    DateTime::from_timestamp(i64::from_be_bytes(secs), 0)
}

/// Encrypt `plaintext` under `material`
///
/// Derives the cipher key on every call; hold a [`FieldCipher`] for
/// repeated use.
pub fn encode(plaintext: &[u8], material: &KeyMaterial) -> CofferResult<Vec<u8>> {
    FieldCipher::new(material)?.encode(plaintext)
}

/// Decrypt a token under `material`
pub fn decode(token: &[u8], material: &KeyMaterial) -> CofferResult<Vec<u8>> {
    FieldCipher::new(material)?.decode(token)
}
