//! Encrypted backup and restore for Coffer
//!
//! # Architecture
//!
//! - `archive`: container format (zip of snapshot + metadata), the
//!   cleartext envelope header and archive file names
//! - `manager`: `BackupEngine`, which creates, lists, inspects and prunes
//!   archives under the single-instance operation lock
//! - `restore`: restore with integrity check and a pre-restore safety backup
//! - `retention`: which archives to keep
//! - `scheduler`: one scheduled cycle, and a background thread running them
//!
//! # Retention Policy
//!
//! The 7 most recent `scheduled` archives are kept (configurable);
//! `manual` and `initial` archives are never pruned.
//!
//! # Example
//!
//! ```rust,ignore
//! use coffer::backup::{BackupEngine, BackupKind};
//!
//! let keys = key_manager.verify_with_canary()?;
//! let engine = BackupEngine::from_settings(&paths, &settings, &keys)?;
//!
//! let report = engine.create_backup(BackupKind::Manual)?;
//! let restored = engine.restore_backup(&report.backup.filename)?;
//! println!("{}", restored.summary());
//! ```

pub mod archive;
mod manager;
mod restore;
pub mod retention;
pub mod scheduler;

pub use archive::{ArchiveMetadata, BackupKind};
pub use manager::{
    BackupEngine, BackupInfo, BackupReport, BackupRequest, BackupStatus, CancelToken, CreatePhase,
    InspectReport,
};
pub use restore::{MigrationOutcome, RestorePhase, RestoreReport};
pub use retention::{RetentionPlan, RetentionPolicy};
pub use scheduler::{run_cycle, BackupScheduler, CycleReport};
