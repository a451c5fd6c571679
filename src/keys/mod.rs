//! Key material management
//!
//! - `material`: the active key, salt and metadata files
//! - `backup`: immutable key backup records in `data/key_backups/`
//! - `manager`: generation, rotation, verification and recovery

pub mod backup;
pub mod manager;
pub mod material;

pub use backup::{KeyBackupRecord, KeyBackupStore, KeyBackupTag};
pub use manager::{KeyContext, KeyManager};
pub use material::{KeyFiles, KeyMaterial, KeyMetadata};
