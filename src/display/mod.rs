//! Display formatting for terminal output
//!
//! Provides table and detail views for archives and key backups.

pub mod backup;
pub mod keys;

pub use backup::{format_backup_list, format_duration, format_inspect, format_size, format_status};
pub use keys::{format_key_backup_list, format_key_status};
