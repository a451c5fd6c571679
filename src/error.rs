//! Custom error types for Coffer
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions. Key-material errors are fatal at startup,
//! backup/restore errors abort the current operation and leave prior state in
//! place.

use thiserror::Error;

/// Process exit status for a successful command
pub const EXIT_SUCCESS: u8 = 0;
/// Process exit status for errors without a dedicated code
pub const EXIT_FAILURE: u8 = 1;
/// Key files are absent
pub const EXIT_KEY_MISSING: u8 = 10;
/// Key files are present but cannot decode existing ciphertext
pub const EXIT_KEY_INCOMPATIBLE: u8 = 11;
/// An archive failed its integrity check
pub const EXIT_INTEGRITY: u8 = 12;
/// Generic I/O failure
pub const EXIT_IO: u8 = 13;

/// The main error type for Coffer operations
#[derive(Error, Debug)]
pub enum CofferError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Validation errors for arguments and records
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Key files are absent; nothing can be decrypted until they are restored
    #[error("Key material missing: {0}")]
    KeyMissing(String),

    /// Key files exist but do not match the data they should decrypt
    #[error("Key material incompatible: {0}")]
    KeyIncompatible(String),

    /// Active key material exists and would be overwritten
    #[error("Key material already exists: {0}")]
    KeyAlreadyExists(String),

    /// A destructive operation was requested without explicit confirmation
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    /// Token verification failed. Wrong key, tampering and truncation are
    /// deliberately indistinguishable.
    #[error("Authentication failed: invalid key or corrupted data")]
    Authentication,

    /// Non-authentication cryptographic failures (key setup, KDF)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decrypted snapshot does not match its recorded hash
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Staging, rename or archive write failures
    #[error("Backup I/O error: {0}")]
    BackupIo(String),

    /// Another backup or restore holds the operation lock
    #[error("Operation in progress: {0}")]
    Busy(String),

    /// A backup was cancelled before it was committed
    #[error("Operation cancelled before commit")]
    Cancelled,

    /// Schema migration failures
    #[error("Migration error: {0}")]
    Migration(String),

    /// Data store errors
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CofferError {
    /// Create a "not found" error for backup archives
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for key backup records
    pub fn key_backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Key backup",
            identifier: identifier.into(),
        }
    }

    /// Create an integrity error from two hex digests
    pub fn integrity(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Integrity {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error concerns the key material itself
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyMissing(_) | Self::KeyIncompatible(_))
    }

    /// Map the error onto the CLI exit status
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::KeyMissing(_) => EXIT_KEY_MISSING,
            Self::KeyIncompatible(_) | Self::Authentication => EXIT_KEY_INCOMPATIBLE,
            Self::Integrity { .. } => EXIT_INTEGRITY,
            Self::Io(_) | Self::BackupIo(_) | Self::Storage(_) => EXIT_IO,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<std::io::Error> for CofferError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CofferError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for Coffer operations
pub type CofferResult<T> = Result<T, CofferError>;
