//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the key, backup and audit layers.

pub mod audit;
pub mod backup;
pub mod keys;

pub use audit::{handle_audit_command, AuditArgs};
pub use backup::{handle_backup_command, BackupCommands};
pub use keys::{handle_key_command, KeyCommands};
