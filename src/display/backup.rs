//! Archive display formatting
//!
//! Formats archive lists, engine status and inspection results for the
//! terminal.

use chrono::{DateTime, Utc};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::backup::{BackupInfo, BackupStatus, InspectReport};

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Archive")]
    filename: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// Format archives as a table, newest first
pub fn format_backup_list(backups: &[BackupInfo], now: DateTime<Utc>) -> String {
    if backups.is_empty() {
        return "No backups found.\nCreate one with: coffer backup create".to_string();
    }

    let rows = backups.iter().enumerate().map(|(i, backup)| BackupRow {
        index: i + 1,
        filename: backup.filename.clone(),
        kind: backup.kind.to_string(),
        age: format_duration(now.signed_duration_since(backup.created_at)),
        size: format_size(backup.size_bytes),
    });

    let mut table = Table::new(rows);
    table.with(Style::psql());
    format!("{}\nTotal: {} backup(s)", table, backups.len())
}

/// Format the engine status summary
pub fn format_status(status: &BackupStatus, now: DateTime<Utc>) -> String {
    let mut output = String::new();
    output.push_str("Backup Status\n");
    output.push_str("=============\n");
    output.push_str(&format!(
        "Scheduled: {} (keeping {})\n",
        status.scheduled, status.retention_limit
    ));
    output.push_str(&format!("Manual:    {}\n", status.manual));
    output.push_str(&format!("Initial:   {}\n", status.initial));
    output.push_str(&format!("Total size: {}\n", format_size(status.total_size)));

    match &status.latest {
        Some(latest) => output.push_str(&format!(
            "Latest: {} ({} ago)\n",
            latest.filename,
            format_duration(now.signed_duration_since(latest.created_at))
        )),
        None => output.push_str("Latest: none\n"),
    }

    if status.pending_prune > 0 {
        output.push_str(&format!(
            "Pending prune: {} scheduled backup(s) over the limit\n",
            status.pending_prune
        ));
    }
    output
}

/// Format the result of `backup info`
pub fn format_inspect(report: &InspectReport) -> String {
    let metadata = &report.metadata;
    let mut output = String::new();
    output.push_str("Backup Details\n");
    output.push_str("==============\n");
    output.push_str(&format!("File: {}\n", report.backup.path.display()));
    output.push_str(&format!("Kind: {}\n", metadata.kind));
    output.push_str(&format!("Size: {}\n", format_size(report.backup.size_bytes)));
    output.push_str(&format!(
        "Created: {}\n",
        metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(encrypted_at) = report.encrypted_at {
        output.push_str(&format!(
            "Encrypted: {}\n",
            encrypted_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    output.push_str(&format!("Store: {} ({})\n", metadata.store_name, format_size(metadata.snapshot_size)));
    output.push_str(&format!("Schema version: {}\n", metadata.schema_version));
    output.push_str(&format!("Key version: {}\n", metadata.key_version));
    output.push_str(&format!("SHA-256: {}\n", metadata.integrity_hash));
    output.push_str(&format!(
        "Integrity: {}\n",
        if report.hash_verified() { "verified" } else { "MISMATCH" }
    ));
    output
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
