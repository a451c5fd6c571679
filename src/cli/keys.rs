//! Key CLI commands
//!
//! Implements CLI commands for key material management.

use clap::Subcommand;

use crate::audit::AuditLogger;
use crate::config::paths::CofferPaths;
use crate::config::settings::Settings;
use crate::display::{format_key_backup_list, format_key_status};
use crate::error::CofferResult;
use crate::keys::{KeyBackupTag, KeyManager};

/// Key subcommands
#[derive(Subcommand)]
pub enum KeyCommands {
    /// Generate key material for a new installation
    Init {
        /// Replace existing key material (data encrypted under it becomes unreadable)
        #[arg(short, long)]
        force: bool,
    },

    /// Replace the active key with a new version
    Rotate {
        /// Confirm rotation
        #[arg(short, long)]
        force: bool,
    },

    /// Record a copy of the active key material
    Backup {
        /// Tag for the record (initial, daily or manual)
        #[arg(short, long, default_value = "manual")]
        tag: KeyBackupTag,
    },

    /// Check that the active key decrypts existing data
    Verify,

    /// Show the active key's metadata
    Status,

    /// List key backup records
    ListBackups,

    /// Put a key backup record back into place
    RestoreBackup {
        /// Record name, e.g. v1_20250101_120000_initial
        name: String,

        /// Replace existing key material
        #[arg(short, long)]
        force: bool,
    },
}

/// Build the key manager for `settings`
pub fn key_manager(paths: &CofferPaths, settings: &Settings) -> KeyManager {
    KeyManager::new(paths, settings.kdf.clone()).with_audit(AuditLogger::new(paths.audit_log()))
}

/// Handle a key command
pub fn handle_key_command(
    paths: &CofferPaths,
    settings: &Settings,
    cmd: KeyCommands,
) -> CofferResult<()> {
    paths.ensure_directories()?;
    let manager = key_manager(paths, settings);

    match cmd {
        KeyCommands::Init { force } => {
            let material = manager.generate(force)?;
            if !paths.settings_file().exists() {
                settings.save(paths)?;
            }

            println!("Key material generated (version {}).", material.version());
            println!("Key file: {}", manager.files().key_path().display());
            println!("Key backups: {}", manager.backups().dir().display());
            println!();
            println!("Keep a copy of the key backup directory somewhere safe.");
            println!("Without the key, archives and encrypted fields cannot be read.");
        }

        KeyCommands::Rotate { force } => {
            if !force {
                println!("WARNING: Rotation does not re-encrypt existing data!");
                println!("Archives and fields written under the current key will need");
                println!("the current key, which is recorded as a manual key backup.");
                println!("To proceed, run again with --force flag:");
                println!("  coffer keys rotate --force");
                return Ok(());
            }

            let previous = manager.load()?.version();
            let material = manager.rotate(true)?;
            println!(
                "Key rotated: version {} -> {}.",
                previous,
                material.version()
            );
        }

        KeyCommands::Backup { tag } => {
            let record = manager.backup(tag)?;
            println!("Key backup recorded: {}", record.name);
        }

        KeyCommands::Verify => {
            let context = manager.verify_with_canary()?;
            println!("Key version {} verified.", context.version());
        }

        KeyCommands::Status => {
            let material = manager.load()?;
            let backups = manager.list_backups()?;
            print!("{}", format_key_status(material.metadata(), backups.len()));
        }

        KeyCommands::ListBackups => {
            let records = manager.list_backups()?;
            println!("{}", format_key_backup_list(&records));
        }

        KeyCommands::RestoreBackup { name, force } => {
            let material = manager.restore_key_backup(&name, force)?;
            println!(
                "Key material restored from {} (version {}).",
                name,
                material.version()
            );
            println!("Run 'coffer keys verify' to check it against existing data.");
        }
    }

    Ok(())
}
