//! Schema migration collaborators
//!
//! The backup engine does not know how the store schema evolves. It asks a
//! [`SchemaMigrator`] which version to record in an archive and runs it
//! against a freshly restored store.

use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::config::settings::MigrationSettings;
use crate::error::{CofferError, CofferResult};

/// Upgrades a store file to the schema the application expects
pub trait SchemaMigrator: Send + Sync {
    /// Schema version of the store at `store`
    fn schema_version(&self, store: &Path) -> CofferResult<u32>;

    /// Bring the store at `store` up to date; returns the resulting version
    fn migrate(&self, store: &Path) -> CofferResult<u32>;
}

/// A schema that never changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSchema(pub u32);

impl SchemaMigrator for FixedSchema {
    fn schema_version(&self, _store: &Path) -> CofferResult<u32> {
        Ok(self.0)
    }

    fn migrate(&self, _store: &Path) -> CofferResult<u32> {
        Ok(self.0)
    }
}

/// Runs an external migration tool with the store path appended
#[derive(Debug, Clone)]
pub struct CommandMigrator {
    program: String,
    args: Vec<String>,
    version: u32,
}

impl CommandMigrator {
    /// `command` is the program followed by its arguments
    pub fn new(command: &[String], version: u32) -> CofferResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CofferError::Config("migration.command must not be empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            version,
        })
    }
}

impl SchemaMigrator for CommandMigrator {
    fn schema_version(&self, _store: &Path) -> CofferResult<u32> {
        Ok(self.version)
    }

    fn migrate(&self, store: &Path) -> CofferResult<u32> {
        info!(program = %self.program, store = %store.display(), "running schema migration");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(store)
            .output()
            .map_err(|e| {
                CofferError::Migration(format!("failed to start {}: {}", self.program, e))
            })?;

        debug!(stdout = %String::from_utf8_lossy(&output.stdout), "migration output");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CofferError::Migration(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(self.version)
    }
}

/// Build the migrator described by the settings
pub fn from_settings(settings: &MigrationSettings) -> CofferResult<Box<dyn SchemaMigrator>> {
    match &settings.command {
        Some(command) => Ok(Box::new(CommandMigrator::new(
            command,
            settings.expected_schema_version,
        )?)),
        None => Ok(Box::new(FixedSchema(settings.expected_schema_version))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_schema() {
        let migrator = FixedSchema(4);
        assert_eq!(migrator.schema_version(Path::new("x.db")).unwrap(), 4);
        assert_eq!(migrator.migrate(Path::new("x.db")).unwrap(), 4);
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            CommandMigrator::new(&[], 1),
            Err(CofferError::Config(_))
        ));
    }

    #[test]
    fn test_from_settings_defaults_to_fixed() {
        let migrator = from_settings(&MigrationSettings::default()).unwrap();
        assert_eq!(migrator.schema_version(Path::new("x.db")).unwrap(), 1);
    }

    #[test]
    fn test_missing_program_is_migration_error() {
        let migrator = CommandMigrator::new(&["coffer-no-such-migrator".to_string()], 2).unwrap();
        assert!(matches!(
            migrator.migrate(Path::new("x.db")),
            Err(CofferError::Migration(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exit_status() {
        let ok = CommandMigrator::new(&["true".to_string()], 3).unwrap();
        assert_eq!(ok.migrate(Path::new("x.db")).unwrap(), 3);

        let failing = CommandMigrator::new(
            &["sh".to_string(), "-c".to_string(), "echo broken >&2; exit 3".to_string()],
            3,
        )
        .unwrap();
        let err = failing.migrate(Path::new("x.db")).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
