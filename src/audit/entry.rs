//! Audit entry data structures
//!
//! Defines the security events Coffer records and the entry format itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Security-relevant operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Key material was generated
    Generate,
    /// Key material was rotated
    Rotate,
    /// A key backup record or archive was written
    Backup,
    /// An archive was restored into the working store
    Restore,
    /// An archive was deleted by retention
    Prune,
    /// Key material passed startup verification
    Verify,
    /// Key material was recovered from a key backup
    Recover,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Generate => write!(f, "GENERATE"),
            Operation::Rotate => write!(f, "ROTATE"),
            Operation::Backup => write!(f, "BACKUP"),
            Operation::Restore => write!(f, "RESTORE"),
            Operation::Prune => write!(f, "PRUNE"),
            Operation::Verify => write!(f, "VERIFY"),
            Operation::Recover => write!(f, "RECOVER"),
        }
    }
}

/// What an audited operation acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    KeyMaterial,
    KeyBackup,
    Archive,
    Store,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::KeyMaterial => write!(f, "KeyMaterial"),
            EntityType::KeyBackup => write!(f, "KeyBackup"),
            EntityType::Archive => write!(f, "Archive"),
            EntityType::Store => write!(f, "Store"),
        }
    }
}

/// A single audit log entry
///
/// Entries never carry key bytes or decrypted field values; `details` holds
/// versions, names and hashes only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the operation occurred (UTC)
    pub timestamp: DateTime<Utc>,

    /// Type of operation performed
    pub operation: Operation,

    /// Type of entity affected
    pub entity_type: EntityType,

    /// Identifier of the affected entity (key version, archive name, ...)
    pub entity_id: String,

    /// Extra structured context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    /// Create an entry stamped with the current time
    pub fn new(operation: Operation, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            entity_type,
            entity_id: entity_id.into(),
            details: None,
        }
    }

    /// Attach structured context
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.operation,
            self.entity_type,
            self.entity_id
        );

        if let Some(details) = &self.details {
            output.push_str(&format!("\n  {}", details));
        }

        output
    }
}
