//! Backup engine for Coffer
//!
//! Creates encrypted, integrity-hashed archives of the working store,
//! lists and resolves them, and enforces the retention policy. Restore
//! lives in `restore.rs`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLogger, EntityType, Operation};
use crate::config::paths::CofferPaths;
use crate::config::settings::Settings;
use crate::crypto::{token_timestamp, FieldCipher};
use crate::error::{CofferError, CofferResult};
use crate::keys::KeyContext;
use crate::migration::{self, SchemaMigrator};
use crate::storage::file_io::{commit_staged, write_staged};
use crate::storage::{DataStore, FileStore, OperationLock};

use super::archive::{
    archive_file_name, integrity_hash, open_envelope, pack, parse_archive_file_name, seal, unpack,
    ArchiveMetadata, BackupKind,
};
use super::retention::RetentionPolicy;

/// A committed archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// Archive filename
    pub filename: String,
    /// Full path to the archive
    pub path: PathBuf,
    pub kind: BackupKind,
    /// When the backup was created (from the filename)
    pub created_at: DateTime<Utc>,
    /// Size in bytes
    pub size_bytes: u64,
}

impl BackupInfo {
    fn from_path(path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_string_lossy().into_owned();
        let (kind, created_at) = parse_archive_file_name(&filename)?;
        let size_bytes = fs::metadata(path).ok()?.len();
        Some(Self {
            filename,
            path: path.to_path_buf(),
            kind,
            created_at,
            size_bytes,
        })
    }
}

/// Shared flag that stops a backup before it commits
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> CofferResult<()> {
        if self.is_cancelled() {
            Err(CofferError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Parameters of one CreateBackup
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub kind: BackupKind,
    pub cancel: CancelToken,
}

impl BackupRequest {
    pub fn new(kind: BackupKind) -> Self {
        Self {
            kind,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// States of CreateBackup, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePhase {
    Snapshotting,
    Hashing,
    Packaging,
    Encrypting,
    WritingStaged,
    Committed,
}

impl fmt::Display for CreatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CreatePhase::Snapshotting => "snapshotting",
            CreatePhase::Hashing => "hashing",
            CreatePhase::Packaging => "packaging",
            CreatePhase::Encrypting => "encrypting",
            CreatePhase::WritingStaged => "writing_staged",
            CreatePhase::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Outcome of CreateBackup
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub backup: BackupInfo,
    pub metadata: ArchiveMetadata,
    /// Archives deleted by the retention pass that followed
    pub pruned: Vec<BackupInfo>,
}

/// Decrypted view of an archive
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub backup: BackupInfo,
    pub metadata: ArchiveMetadata,
    pub actual_hash: String,
    /// Time stamp sealed into the ciphertext
    pub encrypted_at: Option<DateTime<Utc>>,
}

impl InspectReport {
    pub fn hash_verified(&self) -> bool {
        self.actual_hash == self.metadata.integrity_hash
    }
}

/// Archive counts and totals
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupStatus {
    pub scheduled: usize,
    pub manual: usize,
    pub initial: usize,
    pub total_size: u64,
    pub latest: Option<BackupInfo>,
    pub retention_limit: usize,
    /// Scheduled archives the next retention pass would delete
    pub pending_prune: usize,
}

/// Builds, lists, restores and prunes encrypted archives
pub struct BackupEngine {
    pub(super) backup_dir: PathBuf,
    pub(super) lock_path: PathBuf,
    pub(super) store: Box<dyn DataStore>,
    pub(super) cipher: FieldCipher,
    pub(super) migrator: Box<dyn SchemaMigrator>,
    pub(super) retention: RetentionPolicy,
    pub(super) audit: Option<AuditLogger>,
}

impl BackupEngine {
    pub fn new(
        paths: &CofferPaths,
        store: Box<dyn DataStore>,
        keys: &KeyContext,
        migrator: Box<dyn SchemaMigrator>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            backup_dir: paths.backup_dir(),
            lock_path: paths.operation_lock(),
            store,
            cipher: keys.cipher().clone(),
            migrator,
            retention,
            audit: None,
        }
    }

    /// Engine over the configured store file and migration hook
    pub fn from_settings(
        paths: &CofferPaths,
        settings: &Settings,
        keys: &KeyContext,
    ) -> CofferResult<Self> {
        let store = FileStore::new(paths.store_file(&settings.store_file));
        let migrator = migration::from_settings(&settings.migration)?;
        Ok(Self::new(
            paths,
            Box::new(store),
            keys,
            migrator,
            RetentionPolicy::new(settings.retention.scheduled_count),
        ))
    }

    /// Record archive events in `logger`
    pub fn with_audit(mut self, logger: AuditLogger) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn store(&self) -> &dyn DataStore {
        self.store.as_ref()
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Create an archive of the given kind and apply retention
    pub fn create_backup(&self, kind: BackupKind) -> CofferResult<BackupReport> {
        self.create_backup_with(BackupRequest::new(kind))
    }

    /// Create an archive
    ///
    /// Fails with [`CofferError::Busy`] while another backup or restore
    /// runs, and with [`CofferError::Cancelled`] if `request.cancel` fires
    /// before the archive is committed; neither leaves an artifact behind.
    pub fn create_backup_with(&self, request: BackupRequest) -> CofferResult<BackupReport> {
        let _lock = OperationLock::acquire(&self.lock_path)?;
        let (backup, metadata) = self.write_archive(request.kind, &request.cancel)?;

        let pruned = match self.prune_locked() {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!(error = %e, "retention pass failed; archive was committed");
                Vec::new()
            }
        };

        Ok(BackupReport {
            backup,
            metadata,
            pruned,
        })
    }

    /// CreateBackup proper; the caller holds the operation lock
    pub(super) fn write_archive(
        &self,
        kind: BackupKind,
        cancel: &CancelToken,
    ) -> CofferResult<(BackupInfo, ArchiveMetadata)> {
        let created_at = Utc::now();

        phase(CreatePhase::Snapshotting);
        cancel.check()?;
        let snapshot = self.store.read_snapshot()?;

        phase(CreatePhase::Hashing);
        cancel.check()?;
        let hash = integrity_hash(&snapshot);

        phase(CreatePhase::Packaging);
        cancel.check()?;
        let metadata = ArchiveMetadata {
            schema_version: self.migrator.schema_version(self.store.path())?,
            key_version: self.cipher.key_version(),
            integrity_hash: hash,
            created_at,
            kind,
            store_name: self
                .store
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            snapshot_size: snapshot.len() as u64,
        };
        let container = pack(&snapshot, &metadata)?;

        phase(CreatePhase::Encrypting);
        cancel.check()?;
        let sealed = seal(&container, &self.cipher)?;

        phase(CreatePhase::WritingStaged);
        cancel.check()?;
        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            CofferError::BackupIo(format!("Failed to create backup directory: {}", e))
        })?;
        let path = self.unused_archive_path(kind, created_at);
        let staged = write_staged(&path, &sealed).map_err(|e| CofferError::BackupIo(e.to_string()))?;

        if let Err(e) = cancel.check() {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
        commit_staged(&staged, &path).map_err(|e| CofferError::BackupIo(e.to_string()))?;
        phase(CreatePhase::Committed);

        let backup = BackupInfo::from_path(&path).ok_or_else(|| {
            CofferError::BackupIo(format!("committed archive {} is unreadable", path.display()))
        })?;

        info!(
            archive = %backup.filename,
            kind = %kind,
            key_version = metadata.key_version,
            size = backup.size_bytes,
            "backup committed"
        );
        self.audit(
            AuditEntry::new(Operation::Backup, EntityType::Archive, &backup.filename).with_details(
                json!({
                    "kind": kind,
                    "key_version": metadata.key_version,
                    "integrity_hash": metadata.integrity_hash,
                }),
            ),
        );
        Ok((backup, metadata))
    }

    /// Archive path for `at`, moved forward a second at a time past
    /// existing names
    fn unused_archive_path(&self, kind: BackupKind, at: DateTime<Utc>) -> PathBuf {
        let mut at = at;
        loop {
            let path = self.backup_dir.join(archive_file_name(kind, at));
            if !path.exists() {
                return path;
            }
            at += Duration::seconds(1);
        }
    }

    /// All committed archives, newest first
    pub fn list_backups(&self) -> CofferResult<Vec<BackupInfo>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();

        for entry in fs::read_dir(&self.backup_dir)
            .map_err(|e| CofferError::Io(format!("Failed to read backup directory: {}", e)))?
        {
            let entry = entry
                .map_err(|e| CofferError::Io(format!("Failed to read directory entry: {}", e)))?;
            if let Some(info) = BackupInfo::from_path(&entry.path()) {
                backups.push(info);
            }
        }

        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });

        Ok(backups)
    }

    /// Get the most recent archive
    pub fn get_latest_backup(&self) -> CofferResult<Option<BackupInfo>> {
        Ok(self.list_backups()?.into_iter().next())
    }

    /// Find an archive by file name, path, or `latest`
    pub fn resolve(&self, name: &str) -> CofferResult<BackupInfo> {
        if name == "latest" {
            return self
                .get_latest_backup()?
                .ok_or_else(|| CofferError::backup_not_found(name));
        }

        let candidate = Path::new(name);
        let path = if candidate.components().count() > 1 {
            candidate.to_path_buf()
        } else {
            self.backup_dir.join(name)
        };

        if !path.is_file() {
            return Err(CofferError::backup_not_found(name));
        }
        BackupInfo::from_path(&path).ok_or_else(|| {
            CofferError::Validation(format!("{} is not a coffer archive name", name))
        })
    }

    /// Decrypt and unpack an archive file
    ///
    /// A token that does not decode under the active key is reported as
    /// [`CofferError::KeyIncompatible`] when the header names another key
    /// version, and as [`CofferError::Integrity`] otherwise.
    pub(super) fn open_archive(&self, bytes: &[u8]) -> CofferResult<(Vec<u8>, ArchiveMetadata)> {
        let (recorded_version, token) = open_envelope(bytes)?;
        let active_version = self.cipher.key_version();

        let container = match self.cipher.decode(token) {
            Ok(container) if recorded_version == active_version => container,
            Ok(_) => {
                return Err(CofferError::integrity(
                    format!("header key version {}", active_version),
                    format!("header key version {}", recorded_version),
                ))
            }
            Err(_) if recorded_version != active_version => {
                return Err(CofferError::KeyIncompatible(format!(
                    "archive was encrypted with key v{}, active key is v{}; recover key v{} from a key backup first",
                    recorded_version, active_version, recorded_version
                )))
            }
            Err(_) => {
                return Err(CofferError::integrity(
                    "authentic archive",
                    "authentication failed (archive corrupted or tampered)",
                ))
            }
        };

        unpack(&container)
    }

    /// Decrypt an archive and check its hash without touching the store
    pub fn inspect(&self, name: &str) -> CofferResult<InspectReport> {
        let backup = self.resolve(name)?;
        let bytes = fs::read(&backup.path)
            .map_err(|e| CofferError::BackupIo(format!("Failed to read {}: {}", backup.filename, e)))?;
        let (snapshot, metadata) = self.open_archive(&bytes)?;
        let encrypted_at = open_envelope(&bytes)
            .ok()
            .and_then(|(_, token)| token_timestamp(token));

        Ok(InspectReport {
            backup,
            metadata,
            actual_hash: integrity_hash(&snapshot),
            encrypted_at,
        })
    }

    /// Apply the retention policy
    ///
    /// With `dry_run` nothing is deleted and the archives that would go are
    /// returned.
    pub fn enforce_retention(&self, dry_run: bool) -> CofferResult<Vec<BackupInfo>> {
        if dry_run {
            return Ok(self.retention.plan(&self.list_backups()?).prune);
        }
        let _lock = OperationLock::acquire(&self.lock_path)?;
        self.prune_locked()
    }

    fn prune_locked(&self) -> CofferResult<Vec<BackupInfo>> {
        let plan = self.retention.plan(&self.list_backups()?);
        let mut deleted = Vec::new();

        for backup in plan.prune {
            fs::remove_file(&backup.path).map_err(|e| {
                CofferError::BackupIo(format!("Failed to delete old backup {}: {}", backup.filename, e))
            })?;
            debug!(archive = %backup.filename, "pruned by retention");
            self.audit(AuditEntry::new(Operation::Prune, EntityType::Archive, &backup.filename));
            deleted.push(backup);
        }

        if !deleted.is_empty() {
            info!(count = deleted.len(), "retention pruned old scheduled backups");
        }
        Ok(deleted)
    }

    /// Counts per kind, total size and the newest archive
    pub fn status(&self) -> CofferResult<BackupStatus> {
        let backups = self.list_backups()?;
        let mut status = BackupStatus {
            retention_limit: self.retention.scheduled_count,
            pending_prune: self.retention.plan(&backups).prune.len(),
            latest: backups.first().cloned(),
            ..BackupStatus::default()
        };
        for backup in &backups {
            status.total_size += backup.size_bytes;
            match backup.kind {
                BackupKind::Scheduled => status.scheduled += 1,
                BackupKind::Manual => status.manual += 1,
                BackupKind::Initial => status.initial += 1,
            }
        }
        Ok(status)
    }

    pub(super) fn audit(&self, entry: AuditEntry) {
        if let Some(logger) = &self.audit {
            logger.record(entry);
        }
    }
}

fn phase(phase: CreatePhase) {
    debug!(phase = %phase, "create backup");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::keys::KeyMaterial;
    use crate::migration::FixedSchema;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub engine: BackupEngine,
        pub paths: CofferPaths,
        pub keys: KeyContext,
        pub _temp: TempDir,
    }

    pub(crate) fn fixture_with(material: KeyMaterial, retention: usize) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let paths = CofferPaths::with_base_dir(temp_dir.path().to_path_buf());
        paths.ensure_directories().unwrap();

        let store_path = paths.store_file("patrimoine.db");
        fs::write(&store_path, b"SQLite format 3\0 wealth records").unwrap();

        let keys = KeyContext::new(material).unwrap();
        let engine = BackupEngine::new(
            &paths,
            Box::new(FileStore::new(store_path)),
            &keys,
            Box::new(FixedSchema(1)),
            RetentionPolicy::new(retention),
        )
        .with_audit(AuditLogger::new(paths.audit_log()));

        Fixture {
            engine,
            paths,
            keys,
            _temp: temp_dir,
        }
    }

    pub(crate) fn fast_material(version: u32) -> KeyMaterial {
        KeyMaterial::generate_with(version, KdfParams::with_values(1024, 1, 1))
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with(fast_material(1), 7)
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn test_create_backup() {
        let f = fixture();

        let report = f.engine.create_backup(BackupKind::Manual).unwrap();
        assert!(report.backup.path.exists());
        assert!(report.backup.filename.starts_with("manual_backup_"));
        assert!(report.backup.filename.ends_with(".zip.enc"));
        assert_eq!(report.metadata.key_version, 1);
        assert_eq!(report.metadata.store_name, "patrimoine.db");
        assert!(report.pruned.is_empty());
        assert_eq!(leftover_temp_files(f.engine.backup_dir()), 0);
    }

    #[test]
    fn test_archive_does_not_contain_plaintext() {
        let f = fixture();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();

        let bytes = fs::read(&report.backup.path).unwrap();
        let needle = b"wealth records";
        assert!(!bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_missing_store_is_not_found() {
        let f = fixture();
        fs::remove_file(f.engine.store().path()).unwrap();

        let err = f.engine.create_backup(BackupKind::Manual).unwrap_err();
        assert!(err.is_not_found());
        assert!(f.engine.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_list_backups_newest_first() {
        let f = fixture();
        f.engine.create_backup(BackupKind::Initial).unwrap();
        f.engine.create_backup(BackupKind::Scheduled).unwrap();
        f.engine.create_backup(BackupKind::Manual).unwrap();

        let backups = f.engine.list_backups().unwrap();
        assert_eq!(backups.len(), 3);
        assert!(backups[0].created_at >= backups[1].created_at);
        assert!(backups[1].created_at >= backups[2].created_at);
        assert_eq!(f.engine.get_latest_backup().unwrap().unwrap(), backups[0]);
    }

    #[test]
    fn test_same_second_backups_get_distinct_names() {
        let f = fixture();
        let backups: Vec<BackupInfo> = (0..5)
            .map(|_| f.engine.create_backup(BackupKind::Manual).unwrap().backup)
            .collect();

        let names: std::collections::HashSet<&str> =
            backups.iter().map(|b| b.filename.as_str()).collect();
        assert_eq!(names.len(), 5);
        for backup in &backups {
            // manual_backup_YYYYMMDD_HHMMSS.zip.enc
            let stamp = backup
                .filename
                .strip_prefix("manual_backup_")
                .and_then(|rest| rest.strip_suffix(".zip.enc"))
                .unwrap();
            assert_eq!(stamp.len(), 15);
            assert_eq!(&stamp[8..9], "_");
            assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
        }
        for pair in backups.windows(2) {
            assert!(pair[1].created_at > pair[0].created_at);
        }
    }

    #[test]
    fn test_retention_after_ten_scheduled() {
        let f = fixture();
        f.engine.create_backup(BackupKind::Initial).unwrap();
        f.engine.create_backup(BackupKind::Manual).unwrap();

        let mut pruned = 0;
        for _ in 0..10 {
            pruned += f.engine.create_backup(BackupKind::Scheduled).unwrap().pruned.len();
        }
        assert_eq!(pruned, 3);

        let status = f.engine.status().unwrap();
        assert_eq!(status.scheduled, 7);
        assert_eq!(status.manual, 1);
        assert_eq!(status.initial, 1);
        assert_eq!(status.pending_prune, 0);
    }

    #[test]
    fn test_enforce_retention_dry_run() {
        let f = fixture_with(fast_material(1), 2);
        for _ in 0..2 {
            f.engine.create_backup(BackupKind::Scheduled).unwrap();
        }
        // Retention is already satisfied after each commit
        assert!(f.engine.enforce_retention(true).unwrap().is_empty());

        let engine = BackupEngine {
            retention: RetentionPolicy::new(1),
            ..f.engine
        };
        let would_prune = engine.enforce_retention(true).unwrap();
        assert_eq!(would_prune.len(), 1);
        assert_eq!(engine.list_backups().unwrap().len(), 2);

        let pruned = engine.enforce_retention(false).unwrap();
        assert_eq!(pruned, would_prune);
        assert_eq!(engine.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_busy_while_locked() {
        let f = fixture();
        let _held = OperationLock::acquire(&f.paths.operation_lock()).unwrap();

        let err = f.engine.create_backup(BackupKind::Manual).unwrap_err();
        assert!(matches!(err, CofferError::Busy(_)));
        assert!(f.engine.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_backup_leaves_nothing() {
        let f = fixture();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = f
            .engine
            .create_backup_with(BackupRequest::new(BackupKind::Scheduled).with_cancel(cancel))
            .unwrap_err();
        assert!(matches!(err, CofferError::Cancelled));
        assert!(f.engine.list_backups().unwrap().is_empty());
        assert_eq!(leftover_temp_files(f.engine.backup_dir()), 0);
    }

    #[test]
    fn test_inspect() {
        let f = fixture();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();

        let inspected = f.engine.inspect(&report.backup.filename).unwrap();
        assert!(inspected.hash_verified());
        assert_eq!(inspected.metadata, report.metadata);

        let latest = f.engine.inspect("latest").unwrap();
        assert_eq!(latest.backup, report.backup);

        let encrypted_at = inspected.encrypted_at.unwrap();
        let drift = (encrypted_at - report.metadata.created_at).num_seconds().abs();
        assert!(drift <= 5);
    }

    #[test]
    fn test_resolve_unknown() {
        let f = fixture();
        assert!(f.engine.resolve("latest").unwrap_err().is_not_found());
        assert!(f
            .engine
            .resolve("manual_backup_20250101_000000.zip.enc")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_backups_are_audited() {
        let f = fixture();
        f.engine.create_backup(BackupKind::Manual).unwrap();

        let entries = AuditLogger::new(f.paths.audit_log()).read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, Operation::Backup);
        assert_eq!(entries[0].entity_type, EntityType::Archive);
        assert_eq!(f.keys.version(), 1);
    }
}
