//! User settings for Coffer
//!
//! Manages the store location, retention policy, key-derivation cost,
//! scheduling interval and the schema-migration hook.

use serde::{Deserialize, Serialize};

use super::paths::CofferPaths;
use crate::crypto::key_derivation::KdfParams;
use crate::error::CofferError;

/// Archive retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Number of scheduled archives to keep
    pub scheduled_count: usize,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self { scheduled_count: 7 }
    }
}

/// Background scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Seconds between scheduled backup cycles
    pub interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
        }
    }
}

/// Schema migration hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Schema version the application currently expects
    #[serde(default = "default_expected_schema_version")]
    pub expected_schema_version: u32,

    /// External command run against a restored store (program followed by
    /// its arguments; the store path is appended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            expected_schema_version: default_expected_schema_version(),
            command: None,
        }
    }
}

fn default_expected_schema_version() -> u32 {
    1
}

/// User settings for Coffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Settings file format version
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// File name of the working store inside the data directory
    #[serde(default = "default_store_file")]
    pub store_file: String,

    /// Archive retention policy
    #[serde(default)]
    pub retention: RetentionSettings,

    /// Key derivation cost for newly generated keys
    ///
    /// Existing keys keep the cost recorded in their metadata.
    #[serde(default)]
    pub kdf: KdfParams,

    /// Scheduled backup interval
    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Schema migration hook
    #[serde(default)]
    pub migration: MigrationSettings,
}

fn default_schema_version() -> u32 {
    1
}

fn default_store_file() -> String {
    "patrimoine.db".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            store_file: default_store_file(),
            retention: RetentionSettings::default(),
            kdf: KdfParams::default(),
            schedule: ScheduleSettings::default(),
            migration: MigrationSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &CofferPaths) -> Result<Self, CofferError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| CofferError::Io(format!("Failed to read settings file: {}", e)))?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                CofferError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            settings.validate()?;
            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &CofferPaths) -> Result<(), CofferError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| CofferError::Config(format!("Failed to serialize settings: {}", e)))?;

        crate::storage::file_io::write_bytes_atomic(paths.settings_file(), contents.as_bytes())
    }

    /// Reject settings that would make the engine misbehave
    pub fn validate(&self) -> Result<(), CofferError> {
        if self.store_file.is_empty() || self.store_file.contains(|c| c == '/' || c == '\\') {
            return Err(CofferError::Config(format!(
                "store_file must be a plain file name, got '{}'",
                self.store_file
            )));
        }
        if self.retention.scheduled_count == 0 {
            return Err(CofferError::Config(
                "retention.scheduled_count must be at least 1".into(),
            ));
        }
        if self.schedule.interval_secs == 0 {
            return Err(CofferError::Config(
                "schedule.interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.retention.scheduled_count, 7);
        assert_eq!(settings.store_file, "patrimoine.db");
        assert_eq!(settings.schedule.interval_secs, 86_400);
        assert!(settings.migration.command.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = CofferPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.store_file = "wealth.db".into();
        settings.retention.scheduled_count = 3;

        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.store_file, "wealth.db");
        assert_eq!(loaded.retention.scheduled_count, 3);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let paths = CofferPaths::with_base_dir(temp_dir.path().to_path_buf());
        paths.ensure_directories().unwrap();
        std::fs::write(paths.settings_file(), r#"{"store_file": "other.db"}"#).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.store_file, "other.db");
        assert_eq!(loaded.retention.scheduled_count, 7);
    }

    #[test]
    fn test_rejects_zero_retention() {
        let mut settings = Settings::default();
        settings.retention.scheduled_count = 0;
        assert!(matches!(settings.validate(), Err(CofferError::Config(_))));
    }

    #[test]
    fn test_rejects_store_path() {
        let mut settings = Settings::default();
        settings.store_file = "../elsewhere.db".into();
        assert!(settings.validate().is_err());
    }
}
