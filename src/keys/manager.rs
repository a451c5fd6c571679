//! Key lifecycle: generation, rotation, backup, verification and recovery
//!
//! `KeyManager` is the only writer of the active key files. Everything that
//! needs the key receives a [`KeyContext`] built once at startup.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditLogger, EntityType, Operation};
use crate::config::paths::CofferPaths;
use crate::crypto::{FieldCipher, KdfParams};
use crate::error::{CofferError, CofferResult};

use super::backup::{KeyBackupRecord, KeyBackupStore, KeyBackupTag};
use super::material::{KeyFiles, KeyMaterial};

/// Known plaintext sealed into `.key_canary`
const CANARY_PLAINTEXT: &[u8] = b"coffer-key-canary";

/// Verified key material and the cipher derived from it
///
/// Built once by [`KeyManager::verify_startup`] and passed explicitly to
/// the components that encrypt.
#[derive(Debug, Clone)]
pub struct KeyContext {
    material: KeyMaterial,
    cipher: FieldCipher,
}

impl KeyContext {
    /// Wrap `material` without touching the filesystem
    pub fn new(material: KeyMaterial) -> CofferResult<Self> {
        let cipher = FieldCipher::new(&material)?;
        Ok(Self { material, cipher })
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    pub fn version(&self) -> u32 {
        self.material.version()
    }
}

/// Generates, versions, verifies and backs up key material
#[derive(Debug, Clone)]
pub struct KeyManager {
    files: KeyFiles,
    backups: KeyBackupStore,
    kdf: KdfParams,
    audit: Option<AuditLogger>,
}

impl KeyManager {
    pub fn new(paths: &CofferPaths, kdf: KdfParams) -> Self {
        Self {
            files: KeyFiles::new(paths),
            backups: KeyBackupStore::new(paths.key_backup_dir()),
            kdf,
            audit: None,
        }
    }

    /// Record lifecycle events in `logger`
    pub fn with_audit(mut self, logger: AuditLogger) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn files(&self) -> &KeyFiles {
        &self.files
    }

    pub fn backups(&self) -> &KeyBackupStore {
        &self.backups
    }

    /// KDF cost given to newly generated keys
    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Whether any active key file is present
    pub fn has_material(&self) -> bool {
        self.files.any_exists()
    }

    /// Load the active material without verifying it
    pub fn load(&self) -> CofferResult<KeyMaterial> {
        self.files.load()
    }

    /// Create new key material
    ///
    /// Refuses with [`CofferError::KeyAlreadyExists`] if active material
    /// exists and `force` is false. A fresh installation gets version 1;
    /// forced regeneration backs the old material up as `manual` and takes
    /// the next unused version. An `initial` record is written for the new
    /// version.
    pub fn generate(&self, force: bool) -> CofferResult<KeyMaterial> {
        let mut highest = self.backups.max_version()?;

        if self.files.any_exists() {
            if !force {
                return Err(CofferError::KeyAlreadyExists(format!(
                    "{} is present; pass --force to replace it (data encrypted under it becomes unreadable)",
                    self.files.key_path().display()
                )));
            }
            match self.files.load() {
                Ok(old) => {
                    self.write_backup(&old, KeyBackupTag::Manual)?;
                    highest = highest.max(Some(old.version()));
                }
                Err(e) => warn!(error = %e, "existing key material unreadable, not backed up"),
            }
        }

        let version = highest.map_or(1, |v| v + 1);
        let material = KeyMaterial::generate_with(version, self.kdf.clone());
        self.install(&material)?;

        if !self.backups.has_initial(version)? {
            self.write_backup(&material, KeyBackupTag::Initial)?;
        }

        info!(version, "key material generated");
        self.audit(
            AuditEntry::new(Operation::Generate, EntityType::KeyMaterial, format!("v{}", version))
                .with_details(json!({ "forced": force })),
        );
        Ok(material)
    }

    /// Replace the active material with a new version
    ///
    /// Existing ciphertext is not re-encrypted; anything encoded under the
    /// old key needs the `manual` record taken here to be read again.
    pub fn rotate(&self, force: bool) -> CofferResult<KeyMaterial> {
        if !force {
            return Err(CofferError::ConfirmationRequired(
                "rotation does not re-encrypt existing data; pass --force to rotate".into(),
            ));
        }

        let current = self.files.load()?;
        self.write_backup(&current, KeyBackupTag::Manual)?;

        let highest = self.backups.max_version()?.unwrap_or(0).max(current.version());
        let material = KeyMaterial::generate_with(highest + 1, self.kdf.clone());
        self.install(&material)?;

        warn!(
            previous = current.version(),
            version = material.version(),
            "key rotated; data encrypted under the previous key is not re-encrypted"
        );
        self.audit(
            AuditEntry::new(
                Operation::Rotate,
                EntityType::KeyMaterial,
                format!("v{}", material.version()),
            )
            .with_details(json!({ "previous_version": current.version() })),
        );
        Ok(material)
    }

    /// Snapshot the active material under `tag`
    pub fn backup(&self, tag: KeyBackupTag) -> CofferResult<KeyBackupRecord> {
        let material = self.files.load()?;
        self.write_backup(&material, tag)
    }

    /// Take today's `daily` record unless one already exists
    pub fn backup_daily(&self) -> CofferResult<Option<KeyBackupRecord>> {
        let material = self.files.load()?;
        let today = Utc::now().date_naive();
        if self.backups.has_daily_on(material.version(), today)? {
            return Ok(None);
        }
        self.write_backup(&material, KeyBackupTag::Daily).map(Some)
    }

    /// Check the active key before anything else runs
    ///
    /// Missing files yield [`CofferError::KeyMissing`]. If `sample` is
    /// given it must decode under the key, otherwise the result is
    /// [`CofferError::KeyIncompatible`]. On success `last_verified_at` is
    /// updated.
    pub fn verify_startup(&self, sample: Option<&[u8]>) -> CofferResult<KeyContext> {
        let mut material = self.files.load()?;
        let cipher = FieldCipher::new(&material)?;

        if let Some(sample) = sample {
            cipher.decode(sample).map_err(|_| {
                CofferError::KeyIncompatible(format!(
                    "key v{} cannot decrypt existing data; restore the matching key from {}",
                    material.version(),
                    self.backups.dir().display()
                ))
            })?;
        }

        material.mark_verified(Utc::now());
        if let Err(e) = self.files.save_metadata(material.metadata()) {
            warn!(error = %e, "failed to record key verification time");
        }

        info!(version = material.version(), "key material verified");
        self.audit(AuditEntry::new(
            Operation::Verify,
            EntityType::KeyMaterial,
            format!("v{}", material.version()),
        ));
        Ok(KeyContext { material, cipher })
    }

    /// [`verify_startup`](Self::verify_startup) against the stored canary
    pub fn verify_with_canary(&self) -> CofferResult<KeyContext> {
        let canary = self.files.read_canary()?;
        if canary.is_none() {
            warn!("no key canary recorded; verifying key presence only");
        }
        let context = self.verify_startup(canary.as_deref())?;
        if canary.is_none() {
            self.write_canary(context.cipher())?;
        }
        Ok(context)
    }

    /// Key backup records, newest first
    pub fn list_backups(&self) -> CofferResult<Vec<KeyBackupRecord>> {
        self.backups.list()
    }

    /// Put the material of a key backup record back into place
    ///
    /// Refuses with [`CofferError::KeyAlreadyExists`] if active material
    /// exists and `force` is false; with `force` the current material is
    /// first backed up as `manual`.
    pub fn restore_key_backup(&self, name: &str, force: bool) -> CofferResult<KeyMaterial> {
        let record = self.backups.find(name)?;
        let material = self.backups.read(&record)?;

        if self.files.any_exists() {
            if !force {
                return Err(CofferError::KeyAlreadyExists(
                    "active key material present; pass --force to replace it".into(),
                ));
            }
            match self.files.load() {
                Ok(current) => {
                    self.write_backup(&current, KeyBackupTag::Manual)?;
                }
                Err(e) => warn!(error = %e, "active key material unreadable, not backed up"),
            }
        }

        self.install(&material)?;

        info!(record = %record.name, version = material.version(), "key material recovered");
        self.audit(
            AuditEntry::new(
                Operation::Recover,
                EntityType::KeyMaterial,
                format!("v{}", material.version()),
            )
            .with_details(json!({ "record": record.name })),
        );
        Ok(material)
    }

    /// Write key files and a fresh canary
    fn install(&self, material: &KeyMaterial) -> CofferResult<()> {
        self.files.save(material)?;
        let cipher = FieldCipher::new(material)?;
        self.write_canary(&cipher)
    }

    fn write_canary(&self, cipher: &FieldCipher) -> CofferResult<()> {
        let token = cipher.encode(CANARY_PLAINTEXT)?;
        self.files.write_canary(&token)
    }

    fn write_backup(&self, material: &KeyMaterial, tag: KeyBackupTag) -> CofferResult<KeyBackupRecord> {
        let record = self.backups.write(material, tag, Utc::now())?;
        info!(record = %record.name, "key backup recorded");
        self.audit(AuditEntry::new(Operation::Backup, EntityType::KeyBackup, &record.name));
        Ok(record)
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(logger) = &self.audit {
            logger.record(entry);
        }
    }
}
