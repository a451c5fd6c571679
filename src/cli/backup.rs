//! Backup CLI commands
//!
//! Implements CLI commands for archive management.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;

use crate::audit::AuditLogger;
use crate::backup::{run_cycle, BackupEngine, BackupKind, BackupScheduler, CancelToken};
use crate::config::paths::CofferPaths;
use crate::config::settings::Settings;
use crate::display::{format_backup_list, format_inspect, format_status};
use crate::error::CofferResult;
use crate::keys::KeyManager;

use super::keys::key_manager;

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Run one scheduled cycle (archive, retention, daily key backup)
    Run,

    /// Create a manual backup
    Create,

    /// Show archive counts and retention state
    Status,

    /// List all available backups
    List,

    /// Decrypt and verify an archive without restoring it
    Info {
        /// Backup filename or path (use 'latest' for most recent)
        backup: String,
    },

    /// Delete scheduled backups beyond the retention limit
    Prune {
        /// Delete instead of only listing
        #[arg(short, long)]
        force: bool,
    },

    /// Restore from a backup
    Restore {
        /// Backup filename or path (use 'latest' for most recent)
        backup: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Run scheduled cycles in the foreground
    Schedule {
        /// Seconds between cycles (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many cycles
        #[arg(short = 'n', long)]
        iterations: Option<u64>,
    },
}

/// Handle a backup command
///
/// The key is verified against its canary before any archive is touched.
pub fn handle_backup_command(
    paths: &CofferPaths,
    settings: &Settings,
    cmd: BackupCommands,
) -> CofferResult<()> {
    paths.ensure_directories()?;
    let keys = key_manager(paths, settings);
    let context = keys.verify_with_canary()?;
    let engine = BackupEngine::from_settings(paths, settings, &context)?
        .with_audit(AuditLogger::new(paths.audit_log()));

    match cmd {
        BackupCommands::Run => {
            let report = run_cycle(&engine, &keys, &CancelToken::new())?;
            println!("Backup created: {}", report.backup.backup.filename);
            if !report.backup.pruned.is_empty() {
                println!("Pruned {} old backup(s).", report.backup.pruned.len());
            }
            if let Some(record) = report.key_backup {
                println!("Key backup recorded: {}", record.name);
            }
        }

        BackupCommands::Create => {
            println!("Creating backup...");
            let report = engine.create_backup(BackupKind::Manual)?;
            println!("Backup created: {}", report.backup.filename);
            println!("Location: {}", report.backup.path.display());
        }

        BackupCommands::Status => {
            let status = engine.status()?;
            print!("{}", format_status(&status, Utc::now()));
        }

        BackupCommands::List => {
            let backups = engine.list_backups()?;
            println!("{}", format_backup_list(&backups, Utc::now()));
        }

        BackupCommands::Info { backup } => {
            let report = engine.inspect(&backup)?;
            print!("{}", format_inspect(&report));
        }

        BackupCommands::Prune { force } => {
            let candidates = engine.enforce_retention(true)?;
            let retention = engine.retention();

            if candidates.is_empty() {
                println!("No backups to prune.");
                println!(
                    "Current retention policy: {} scheduled backup(s)",
                    retention.scheduled_count
                );
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!(
                "Retention policy: {} scheduled backup(s)",
                retention.scheduled_count
            );
            for backup in &candidates {
                println!("  {}", backup.filename);
            }
            println!("To be deleted: {}", candidates.len());
            println!();

            if !force {
                println!("To delete old backups, run again with --force flag:");
                println!("  coffer backup prune --force");
                return Ok(());
            }

            let deleted = engine.enforce_retention(false)?;
            println!("Deleted {} backup(s).", deleted.len());
        }

        BackupCommands::Restore { backup, force } => {
            let report = engine.inspect(&backup)?;
            print!("{}", format_inspect(&report));
            println!();

            if !force {
                println!("WARNING: This will overwrite the current store!");
                println!("To proceed, run again with --force flag:");
                println!("  coffer backup restore {} --force", backup);
                return Ok(());
            }

            println!("Restoring from backup...");
            let restored = engine.restore_backup(&report.backup.path.to_string_lossy())?;
            println!("Restore complete!");
            println!("{}", restored.summary());
        }

        BackupCommands::Schedule {
            interval,
            iterations,
        } => {
            let interval = Duration::from_secs(interval.unwrap_or(settings.schedule.interval_secs));
            run_scheduler(engine, keys, interval, iterations)?;
        }
    }

    Ok(())
}

fn run_scheduler(
    engine: BackupEngine,
    keys: KeyManager,
    interval: Duration,
    iterations: Option<u64>,
) -> CofferResult<()> {
    println!(
        "Backing up every {}s{}.",
        interval.as_secs(),
        iterations.map_or(String::new(), |n| format!(" for {} cycle(s)", n))
    );
    let scheduler = BackupScheduler::start(Arc::new(engine), Arc::new(keys), interval, iterations)?;
    let cycles = scheduler.join()?;
    println!("Scheduler finished after {} cycle(s).", cycles);
    Ok(())
}
