//! Coffer - encrypted backups and key management for a personal wealth tracker
//!
//! This library provides the data-protection layer for a single-user wealth
//! tracking application: key material lifecycle, field-level encryption of
//! sensitive record fields, and encrypted archives of the working store with
//! retention, restore and scheduling.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types and CLI exit codes
//! - `crypto`: Key derivation, the field cipher and the record codec
//! - `keys`: Key material files, key backups and startup verification
//! - `storage`: Atomic file writes, the working store and locking
//! - `migration`: Schema migration hooks run after a restore
//! - `backup`: Encrypted archives, retention, restore and scheduling
//! - `audit`: Audit logging system
//! - `display`: Terminal formatting
//! - `cli`: Command handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use coffer::backup::{BackupEngine, BackupKind};
//! use coffer::config::{paths::CofferPaths, settings::Settings};
//! use coffer::keys::KeyManager;
//!
//! let paths = CofferPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let keys = KeyManager::new(&paths, settings.kdf.clone()).verify_with_canary()?;
//! let engine = BackupEngine::from_settings(&paths, &settings, &keys)?;
//! engine.create_backup(BackupKind::Manual)?;
//! ```

pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod display;
pub mod error;
pub mod keys;
pub mod migration;
pub mod storage;

pub use error::{CofferError, CofferResult};
