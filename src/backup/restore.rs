//! Restore from an encrypted archive
//!
//! `Decrypting → IntegrityCheck → SafetyBackup → Staging → Swap → Done`.
//! Every step before Swap leaves the working store exactly as it was.

use std::fmt;
use std::fs;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, EntityType, Operation};
use crate::error::{CofferError, CofferResult};
use crate::storage::OperationLock;

use super::archive::{integrity_hash, ArchiveMetadata, BackupKind};
use super::manager::{BackupEngine, BackupInfo, CancelToken};

/// States of RestoreBackup, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Decrypting,
    IntegrityCheck,
    SafetyBackup,
    Staging,
    Swap,
    Done,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestorePhase::Decrypting => "decrypting",
            RestorePhase::IntegrityCheck => "integrity_check",
            RestorePhase::SafetyBackup => "safety_backup",
            RestorePhase::Staging => "staging",
            RestorePhase::Swap => "swap",
            RestorePhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// What the post-restore migration did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The migrator ran and reports this schema version
    Migrated { from: u32, to: u32 },
    /// The migrator failed; the restored store is in place but not upgraded
    Failed { error: String },
}

/// Result of a restore operation
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    /// Archive that was restored
    pub restored: BackupInfo,
    pub metadata: ArchiveMetadata,
    /// Archive of the store as it was before the swap
    pub safety_backup: Option<BackupInfo>,
    pub migration: MigrationOutcome,
}

impl RestoreReport {
    /// One-line summary for the CLI
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Restored {} (key v{}, schema v{})",
            self.restored.filename, self.metadata.key_version, self.metadata.schema_version
        );
        match &self.safety_backup {
            Some(safety) => summary.push_str(&format!("; previous store saved as {}", safety.filename)),
            None => summary.push_str("; no previous store to save"),
        }
        if let MigrationOutcome::Failed { error } = &self.migration {
            summary.push_str(&format!("; migration failed: {}", error));
        }
        summary
    }
}

impl BackupEngine {
    /// Replace the working store with the snapshot in `name`
    ///
    /// `name` is an archive file name, a path, or `latest`. The archive must
    /// decrypt under the active key and match its recorded hash, and the
    /// current store is archived as `manual` first; any failure up to that
    /// point aborts with the store untouched. A failing migration after the
    /// swap is reported, not rolled back.
    pub fn restore_backup(&self, name: &str) -> CofferResult<RestoreReport> {
        let _lock = OperationLock::acquire(&self.lock_path)?;
        let restored = self.resolve(name)?;

        phase(RestorePhase::Decrypting);
        let bytes = fs::read(&restored.path).map_err(|e| {
            CofferError::BackupIo(format!("Failed to read {}: {}", restored.filename, e))
        })?;
        let (snapshot, metadata) = self.open_archive(&bytes)?;

        phase(RestorePhase::IntegrityCheck);
        let actual = integrity_hash(&snapshot);
        if actual != metadata.integrity_hash {
            warn!(archive = %restored.filename, "archive failed its integrity check");
            return Err(CofferError::integrity(metadata.integrity_hash, actual));
        }

        phase(RestorePhase::SafetyBackup);
        let safety_backup = if self.store.exists() {
            let (safety, _) = self.write_archive(BackupKind::Manual, &CancelToken::new())?;
            Some(safety)
        } else {
            warn!(
                store = %self.store.path().display(),
                "no working store to protect; skipping safety backup"
            );
            None
        };

        phase(RestorePhase::Staging);
        phase(RestorePhase::Swap);
        self.store.replace(&snapshot)?;
        phase(RestorePhase::Done);

        let migration = match self.migrator.migrate(self.store.path()) {
            Ok(to) => MigrationOutcome::Migrated {
                from: metadata.schema_version,
                to,
            },
            Err(e) => {
                warn!(error = %e, "schema migration failed after restore");
                MigrationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        info!(
            archive = %restored.filename,
            safety_backup = safety_backup.as_ref().map(|b| b.filename.as_str()).unwrap_or("none"),
            "restore complete"
        );
        self.audit(
            AuditEntry::new(Operation::Restore, EntityType::Store, &restored.filename).with_details(
                json!({
                    "key_version": metadata.key_version,
                    "integrity_hash": metadata.integrity_hash,
                    "safety_backup": safety_backup.as_ref().map(|b| &b.filename),
                    "migration": &migration,
                }),
            ),
        );

        Ok(RestoreReport {
            restored,
            metadata,
            safety_backup,
            migration,
        })
    }
}

fn phase(phase: RestorePhase) {
    debug!(phase = %phase, "restore backup");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manager::tests::{fast_material, fixture, fixture_with, Fixture};
    use crate::migration::SchemaMigrator;
    use crate::storage::{DataStore, FileStore};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn store_hash(f: &Fixture) -> String {
        integrity_hash(&fs::read(f.engine.store().path()).unwrap())
    }

    #[test]
    fn test_backup_restore_is_byte_identical() {
        let f = fixture();
        let original = fs::read(f.engine.store().path()).unwrap();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();

        fs::write(f.engine.store().path(), b"edited after the backup").unwrap();
        let restored = f.engine.restore_backup(&report.backup.filename).unwrap();

        assert_eq!(fs::read(f.engine.store().path()).unwrap(), original);
        assert!(restored.safety_backup.is_some());
        assert_eq!(
            restored.migration,
            MigrationOutcome::Migrated { from: 1, to: 1 }
        );
    }

    #[test]
    fn test_safety_backup_holds_previous_store() {
        let f = fixture();
        let report = f.engine.create_backup(BackupKind::Scheduled).unwrap();
        fs::write(f.engine.store().path(), b"state before restore").unwrap();

        let restored = f.engine.restore_backup("latest").unwrap();
        assert_eq!(restored.restored, report.backup);

        let safety = restored.safety_backup.unwrap();
        assert_eq!(safety.kind, BackupKind::Manual);

        // Restoring the safety backup brings the pre-restore state back
        f.engine.restore_backup(&safety.filename).unwrap();
        assert_eq!(
            fs::read(f.engine.store().path()).unwrap(),
            b"state before restore"
        );
    }

    #[test]
    fn test_other_key_version_leaves_store_untouched() {
        let f1 = fixture_with(fast_material(1), 7);
        let report = f1.engine.create_backup(BackupKind::Manual).unwrap();

        let f2 = fixture_with(fast_material(2), 7);
        fs::copy(&report.backup.path, f2.engine.backup_dir().join(&report.backup.filename)).unwrap();
        let before = store_hash(&f2);

        let err = f2.engine.restore_backup(&report.backup.filename).unwrap_err();
        assert!(matches!(err, CofferError::KeyIncompatible(_)));
        assert_eq!(store_hash(&f2), before);
        // No safety backup was taken
        assert_eq!(f2.engine.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_same_version_foreign_key_is_rejected() {
        let f1 = fixture();
        let report = f1.engine.create_backup(BackupKind::Manual).unwrap();

        let f2 = fixture();
        fs::copy(&report.backup.path, f2.engine.backup_dir().join(&report.backup.filename)).unwrap();
        let before = store_hash(&f2);

        assert!(f2.engine.restore_backup(&report.backup.filename).is_err());
        assert_eq!(store_hash(&f2), before);
    }

    #[test]
    fn test_corrupted_archive_is_integrity_failure() {
        let f = fixture();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();
        fs::write(f.engine.store().path(), b"current store").unwrap();
        let before = store_hash(&f);

        let mut bytes = fs::read(&report.backup.path).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        fs::write(&report.backup.path, &bytes).unwrap();

        let err = f.engine.restore_backup(&report.backup.filename).unwrap_err();
        assert!(matches!(err, CofferError::Integrity { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_INTEGRITY);
        assert_eq!(store_hash(&f), before);
    }

    #[test]
    fn test_tampered_header_version_is_integrity_failure() {
        let f = fixture();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();
        let before = store_hash(&f);

        let mut bytes = fs::read(&report.backup.path).unwrap();
        bytes[8] ^= 0x04;
        fs::write(&report.backup.path, &bytes).unwrap();

        let err = f.engine.restore_backup(&report.backup.filename).unwrap_err();
        assert!(matches!(err, CofferError::Integrity { .. }));
        assert_eq!(store_hash(&f), before);
    }

    #[test]
    fn test_restore_while_busy() {
        let f = fixture();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();
        let _held = OperationLock::acquire(&f.paths.operation_lock()).unwrap();

        assert!(matches!(
            f.engine.restore_backup(&report.backup.filename),
            Err(CofferError::Busy(_))
        ));
    }

    #[test]
    fn test_restore_without_working_store() {
        let f = fixture();
        let original = fs::read(f.engine.store().path()).unwrap();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();
        fs::remove_file(f.engine.store().path()).unwrap();

        let restored = f.engine.restore_backup(&report.backup.filename).unwrap();
        assert!(restored.safety_backup.is_none());
        assert_eq!(fs::read(f.engine.store().path()).unwrap(), original);
    }

    struct BrokenMigrator;

    impl SchemaMigrator for BrokenMigrator {
        fn schema_version(&self, _store: &Path) -> CofferResult<u32> {
            Ok(1)
        }

        fn migrate(&self, _store: &Path) -> CofferResult<u32> {
            Err(CofferError::Migration("upgrade script crashed".into()))
        }
    }

    #[test]
    fn test_failed_migration_is_reported_not_rolled_back() {
        let f = fixture();
        let original = fs::read(f.engine.store().path()).unwrap();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();
        fs::write(f.engine.store().path(), b"newer").unwrap();

        let engine = BackupEngine {
            migrator: Box::new(BrokenMigrator),
            ..f.engine
        };
        let restored = engine.restore_backup(&report.backup.filename).unwrap();

        assert!(matches!(restored.migration, MigrationOutcome::Failed { .. }));
        assert!(restored.summary().contains("migration failed"));
        assert_eq!(fs::read(engine.store().path()).unwrap(), original);
    }

    /// Store whose snapshot read fails, recording any replacement attempt
    struct UnreadableStore {
        inner: FileStore,
        replaced: Arc<AtomicBool>,
    }

    impl DataStore for UnreadableStore {
        fn path(&self) -> &Path {
            self.inner.path()
        }

        fn read_snapshot(&self) -> CofferResult<Vec<u8>> {
            Err(CofferError::Storage("store file is locked by another reader".into()))
        }

        fn replace(&self, bytes: &[u8]) -> CofferResult<()> {
            self.replaced.store(true, AtomicOrdering::SeqCst);
            self.inner.replace(bytes)
        }
    }

    #[test]
    fn test_failed_safety_backup_aborts_restore() {
        let f = fixture();
        let report = f.engine.create_backup(BackupKind::Manual).unwrap();
        let store_path = f.engine.store().path().to_path_buf();
        fs::write(&store_path, b"edited after the backup").unwrap();
        let before = store_hash(&f);

        let replaced = Arc::new(AtomicBool::new(false));
        let engine = BackupEngine {
            store: Box::new(UnreadableStore {
                inner: FileStore::new(store_path.clone()),
                replaced: Arc::clone(&replaced),
            }),
            ..f.engine
        };

        let err = engine.restore_backup(&report.backup.filename).unwrap_err();
        assert!(matches!(err, CofferError::Storage(_)));
        assert!(!replaced.load(AtomicOrdering::SeqCst));
        assert_eq!(integrity_hash(&fs::read(&store_path).unwrap()), before);
        // Only the original archive remains
        assert_eq!(engine.list_backups().unwrap().len(), 1);
    }
}
