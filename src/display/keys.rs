//! Key display formatting

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::keys::{KeyBackupRecord, KeyMetadata};

#[derive(Tabled)]
struct KeyBackupRow {
    #[tabled(rename = "Record")]
    name: String,
    #[tabled(rename = "Version")]
    version: u32,
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "Taken (UTC)")]
    taken: String,
}

/// Format key backup records as a table
pub fn format_key_backup_list(records: &[KeyBackupRecord]) -> String {
    if records.is_empty() {
        return "No key backups found.".to_string();
    }

    let rows = records.iter().map(|record| KeyBackupRow {
        name: record.name.clone(),
        version: record.version,
        tag: record.tag.to_string(),
        taken: record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
    });
    Table::new(rows).with(Style::psql()).to_string()
}

/// Format the active key's metadata (never the key itself)
pub fn format_key_status(metadata: &KeyMetadata, backups: usize) -> String {
    let verified = metadata
        .last_verified_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "Key version: {}\nCreated: {}\nLast verified: {}\nKey backups: {}\n",
        metadata.version,
        metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        verified,
        backups
    )
}
