//! Key material and its on-disk representation
//!
//! The active key lives in three files in the data directory: `.key`
//! (32 raw bytes), `.salt` (16 raw bytes) and `.key_metadata.json`
//! (version, timestamps and KDF cost). A fourth file, `.key_canary`, holds a token
//! encoded under the key so startup can prove the key still decrypts.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::paths::CofferPaths;
use crate::crypto::KdfParams;
use crate::error::{CofferError, CofferResult};
use crate::storage::file_io::{read_json_required, write_bytes_atomic, write_json_atomic};

/// Length of the raw key in bytes
pub const KEY_LEN: usize = 32;
/// Length of the salt in bytes
pub const SALT_LEN: usize = 16;

/// Version and lifecycle timestamps of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Monotonically increasing key version, starting at 1
    pub version: u32,
    /// When this key was generated
    pub created_at: DateTime<Utc>,
    /// Last successful startup verification
    #[serde(default)]
    pub last_verified_at: Option<DateTime<Utc>>,
    /// Argon2id cost the cipher key is derived with; fixed for the key's
    /// lifetime. Files without it predate the field and used the defaults.
    #[serde(default)]
    pub kdf: KdfParams,
}

impl KeyMetadata {
    /// Metadata for a key generated now, with the default KDF cost
    pub fn new(version: u32) -> Self {
        Self {
            version,
            created_at: Utc::now(),
            last_verified_at: None,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

/// The active symmetric key, its salt and version metadata
///
/// Key and salt bytes are wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    salt: [u8; SALT_LEN],
    #[zeroize(skip)]
    metadata: KeyMetadata,
}

impl KeyMaterial {
    /// Generate fresh random key material with the given version
    pub fn generate(version: u32) -> Self {
        Self::generate_with(version, KdfParams::default())
    }

    /// Generate fresh key material whose cipher key is derived with `kdf`
    pub fn generate_with(version: u32, kdf: KdfParams) -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut salt);
        Self {
            key,
            salt,
            metadata: KeyMetadata::new(version).with_kdf(kdf),
        }
    }

    /// Assemble key material from its parts
    pub fn from_parts(key: [u8; KEY_LEN], salt: [u8; SALT_LEN], metadata: KeyMetadata) -> Self {
        Self {
            key,
            salt,
            metadata,
        }
    }

    pub fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn salt_bytes(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn version(&self) -> u32 {
        self.metadata.version
    }

    pub fn metadata(&self) -> &KeyMetadata {
        &self.metadata
    }

    /// KDF cost recorded with this key
    pub fn kdf(&self) -> &KdfParams {
        &self.metadata.kdf
    }

    pub(crate) fn mark_verified(&mut self, at: DateTime<Utc>) {
        self.metadata.last_verified_at = Some(at);
    }
}

// Never print key bytes
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("version", &self.metadata.version)
            .field("created_at", &self.metadata.created_at)
            .field("last_verified_at", &self.metadata.last_verified_at)
            .finish_non_exhaustive()
    }
}

/// Locations of the active key files
#[derive(Debug, Clone)]
pub struct KeyFiles {
    key: PathBuf,
    salt: PathBuf,
    metadata: PathBuf,
    canary: PathBuf,
}

impl KeyFiles {
    pub fn new(paths: &CofferPaths) -> Self {
        Self {
            key: paths.key_file(),
            salt: paths.salt_file(),
            metadata: paths.key_metadata_file(),
            canary: paths.key_canary_file(),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key
    }

    pub fn salt_path(&self) -> &Path {
        &self.salt
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata
    }

    /// Both key and salt are present
    pub fn exists(&self) -> bool {
        self.key.exists() && self.salt.exists()
    }

    /// Either key or salt is present
    pub fn any_exists(&self) -> bool {
        self.key.exists() || self.salt.exists()
    }

    /// Load the active key material
    ///
    /// Missing key or salt files yield [`CofferError::KeyMissing`]; files of
    /// the wrong size or unreadable metadata yield
    /// [`CofferError::KeyIncompatible`].
    pub fn load(&self) -> CofferResult<KeyMaterial> {
        let missing: Vec<String> = [&self.key, &self.salt]
            .into_iter()
            .filter(|p| !p.exists())
            .map(|p| p.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(CofferError::KeyMissing(format!(
                "missing {}; run `coffer keys init` for a new installation or restore the files from a key backup",
                missing.join(", ")
            )));
        }

        let key: [u8; KEY_LEN] = read_fixed(&self.key)?;
        let salt: [u8; SALT_LEN] = read_fixed(&self.salt)?;

        let metadata = if self.metadata.exists() {
            read_json_required::<KeyMetadata, _>(&self.metadata).map_err(|e| {
                CofferError::KeyIncompatible(format!("unreadable key metadata: {}", e))
            })?
        } else {
            warn!(
                path = %self.metadata.display(),
                "key metadata missing, assuming version 1"
            );
            KeyMetadata::new(1)
        };

        if metadata.version == 0 {
            return Err(CofferError::KeyIncompatible(
                "key metadata records version 0".into(),
            ));
        }

        Ok(KeyMaterial::from_parts(key, salt, metadata))
    }

    /// Persist key, salt and metadata
    pub fn save(&self, material: &KeyMaterial) -> CofferResult<()> {
        write_bytes_atomic(&self.key, material.key_bytes())?;
        write_bytes_atomic(&self.salt, material.salt_bytes())?;
        self.save_metadata(material.metadata())
    }

    /// Persist only the metadata file
    pub fn save_metadata(&self, metadata: &KeyMetadata) -> CofferResult<()> {
        write_json_atomic(&self.metadata, metadata)
    }

    /// Read the verification token, if one has been written
    pub fn read_canary(&self) -> CofferResult<Option<Vec<u8>>> {
        match fs::read(&self.canary) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CofferError::Io(format!("Failed to read key canary: {}", e))),
        }
    }

    /// Replace the verification token
    pub fn write_canary(&self, token: &[u8]) -> CofferResult<()> {
        write_bytes_atomic(&self.canary, token)
    }
}

/// Read a file that must be exactly `N` bytes long
pub(crate) fn read_fixed<const N: usize>(path: &Path) -> CofferResult<[u8; N]> {
    let mut bytes = fs::read(path)
        .map_err(|e| CofferError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    let result = <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        CofferError::KeyIncompatible(format!(
            "{} holds {} bytes, expected {}",
            path.display(),
            bytes.len(),
            N
        ))
    });
    bytes.zeroize();
    result
}
