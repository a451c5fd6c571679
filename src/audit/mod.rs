//! Audit logging for Coffer
//!
//! Records security-relevant events (key generation, rotation, key backups,
//! archive creation, restores, pruning, verification) in an append-only
//! JSONL log next to the settings file.
//!
//! # Example
//!
//! ```rust,ignore
//! use coffer::audit::{AuditEntry, AuditLogger, EntityType, Operation};
//!
//! let logger = AuditLogger::new(paths.audit_log());
//! logger.record(AuditEntry::new(Operation::Rotate, EntityType::KeyMaterial, "v2"));
//! ```

mod entry;
mod logger;

pub use entry::{AuditEntry, EntityType, Operation};
pub use logger::AuditLogger;
