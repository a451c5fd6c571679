//! Path management for Coffer
//!
//! Resolves where key material, key backups, archives, settings and the audit
//! log live.
//!
//! ## Path Resolution Order
//!
//! 1. `COFFER_DATA_DIR` environment variable (if set)
//! 2. The platform configuration directory (`~/.config/coffer` on Linux,
//!    `~/Library/Application Support/coffer` on macOS, `%APPDATA%\coffer` on
//!    Windows)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::CofferError;

/// Environment variable overriding the base directory
pub const DATA_DIR_ENV: &str = "COFFER_DATA_DIR";

/// Manages all paths used by Coffer
#[derive(Debug, Clone)]
pub struct CofferPaths {
    /// Base directory for all Coffer data
    base_dir: PathBuf,
}

impl CofferPaths {
    /// Create a new CofferPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, CofferError> {
        let base_dir = match std::env::var(DATA_DIR_ENV) {
            Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Create CofferPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Directory holding the working store and the active key files
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Directory holding encrypted archives
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Directory holding key backup records
    pub fn key_backup_dir(&self) -> PathBuf {
        self.data_dir().join("key_backups")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the audit log
    pub fn audit_log(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }

    /// Path of the working store file with the given name
    pub fn store_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    /// Raw 32-byte key
    pub fn key_file(&self) -> PathBuf {
        self.data_dir().join(".key")
    }

    /// Raw 16-byte salt
    pub fn salt_file(&self) -> PathBuf {
        self.data_dir().join(".salt")
    }

    /// Key version and timestamps
    pub fn key_metadata_file(&self) -> PathBuf {
        self.data_dir().join(".key_metadata.json")
    }

    /// Known ciphertext used to verify the key at startup
    pub fn key_canary_file(&self) -> PathBuf {
        self.data_dir().join(".key_canary")
    }

    /// Lock file serializing backup and restore operations
    pub fn operation_lock(&self) -> PathBuf {
        self.backup_dir().join(".operation.lock")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), CofferError> {
        for dir in [
            self.base_dir.clone(),
            self.data_dir(),
            self.key_backup_dir(),
            self.backup_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                CofferError::Io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Resolve the default base directory for the current platform
fn resolve_default_path() -> Result<PathBuf, CofferError> {
    ProjectDirs::from("", "", "coffer")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| CofferError::Config("Could not determine a home directory".into()))
}
