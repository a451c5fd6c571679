//! Key backup records
//!
//! A record is three files in `data/key_backups/` sharing one stem:
//!
//! ```text
//! key_backup_v{version}_{YYYYMMDD_HHMMSS}_{tag}
//! salt_backup_v{version}_{YYYYMMDD_HHMMSS}_{tag}
//! metadata_backup_v{version}_{YYYYMMDD_HHMMSS}_{tag}
//! ```
//!
//! Records are immutable: an existing record is never rewritten. Nothing in
//! this module deletes records.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CofferError, CofferResult};
use crate::storage::file_io::{read_json_required, write_bytes_atomic, write_new};

use super::material::{read_fixed, KeyMaterial, KeyMetadata};

const KEY_PREFIX: &str = "key_backup_";
const SALT_PREFIX: &str = "salt_backup_";
const METADATA_PREFIX: &str = "metadata_backup_";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Why a key backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyBackupTag {
    /// First backup of a freshly generated key; never pruned
    Initial,
    /// Taken by the scheduled cycle, at most once per day
    Daily,
    /// Operator request, or taken before material is replaced
    Manual,
}

impl KeyBackupTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyBackupTag::Initial => "initial",
            KeyBackupTag::Daily => "daily",
            KeyBackupTag::Manual => "manual",
        }
    }
}

impl fmt::Display for KeyBackupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyBackupTag {
    type Err = CofferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(KeyBackupTag::Initial),
            "daily" => Ok(KeyBackupTag::Daily),
            "manual" => Ok(KeyBackupTag::Manual),
            other => Err(CofferError::Validation(format!(
                "unknown key backup tag '{}' (expected initial, daily or manual)",
                other
            ))),
        }
    }
}

/// One recorded copy of key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyBackupRecord {
    /// Shared stem, e.g. `v2_20251001_120000_manual`
    pub name: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub tag: KeyBackupTag,
}

impl KeyBackupRecord {
    fn new(version: u32, timestamp: DateTime<Utc>, tag: KeyBackupTag) -> Self {
        Self {
            name: format!("v{}_{}_{}", version, timestamp.format(STAMP_FORMAT), tag),
            version,
            timestamp,
            tag,
        }
    }

    /// Parse a record stem (with or without the `key_backup_` prefix)
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_prefix(KEY_PREFIX).unwrap_or(name);
        let rest = stem.strip_prefix('v')?;
        let (version, rest) = rest.split_once('_')?;
        let version: u32 = version.parse().ok()?;
        if version == 0 || rest.len() < 15 || !rest.is_char_boundary(15) {
            return None;
        }

        let (stamp, tail) = rest.split_at(15);
        let naive = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
        let tag = match tail {
            "" => KeyBackupTag::Manual,
            _ => tail.strip_prefix('_')?.parse().ok()?,
        };

        Some(Self {
            name: stem.to_string(),
            version,
            timestamp: DateTime::from_naive_utc_and_offset(naive, Utc),
            tag,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Directory of key backup records
#[derive(Debug, Clone)]
pub struct KeyBackupStore {
    dir: PathBuf,
}

impl KeyBackupStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, record: &KeyBackupRecord) -> PathBuf {
        self.dir.join(format!("{}{}", KEY_PREFIX, record.name))
    }

    fn salt_path(&self, record: &KeyBackupRecord) -> PathBuf {
        self.dir.join(format!("{}{}", SALT_PREFIX, record.name))
    }

    fn metadata_path(&self, record: &KeyBackupRecord) -> PathBuf {
        self.dir.join(format!("{}{}", METADATA_PREFIX, record.name))
    }

    /// Record `material` under `tag`
    ///
    /// The key file is created last and never overwritten, so a record is
    /// complete once it is listed. Asking for the same record twice within
    /// one second returns the existing one.
    pub fn write(
        &self,
        material: &KeyMaterial,
        tag: KeyBackupTag,
        at: DateTime<Utc>,
    ) -> CofferResult<KeyBackupRecord> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            CofferError::Io(format!("Failed to create key backup directory: {}", e))
        })?;

        let record = KeyBackupRecord::new(material.version(), at, tag);
        let key_path = self.key_path(&record);
        if key_path.exists() {
            debug!(record = %record.name, "key backup already recorded");
            return Ok(record);
        }

        write_bytes_atomic(self.salt_path(&record), material.salt_bytes())?;
        let metadata = serde_json::to_vec_pretty(material.metadata())?;
        write_bytes_atomic(self.metadata_path(&record), &metadata)?;
        write_new(&key_path, material.key_bytes())?;

        debug!(record = %record.name, "key backup written");
        Ok(record)
    }

    /// All complete records, newest first
    pub fn list(&self) -> CofferResult<Vec<KeyBackupRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir)
            .map_err(|e| CofferError::Io(format!("Failed to read key backup directory: {}", e)))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| CofferError::Io(format!("Failed to read directory entry: {}", e)))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = file_name.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            match KeyBackupRecord::parse(stem) {
                Some(record) if self.salt_path(&record).exists() => records.push(record),
                Some(record) => warn!(record = %record.name, "key backup without salt ignored"),
                None => debug!(file = %file_name, "unrecognized file in key backup directory"),
            }
        }

        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.version.cmp(&a.version))
        });
        Ok(records)
    }

    /// Find a record by stem or by key file name
    pub fn find(&self, name: &str) -> CofferResult<KeyBackupRecord> {
        let stem = name.strip_prefix(KEY_PREFIX).unwrap_or(name);
        self.list()?
            .into_iter()
            .find(|r| r.name == stem)
            .ok_or_else(|| CofferError::key_backup_not_found(name))
    }

    /// Highest key version ever recorded
    pub fn max_version(&self) -> CofferResult<Option<u32>> {
        Ok(self.list()?.iter().map(|r| r.version).max())
    }

    /// Whether an `initial` record exists for `version`
    pub fn has_initial(&self, version: u32) -> CofferResult<bool> {
        Ok(self
            .list()?
            .iter()
            .any(|r| r.version == version && r.tag == KeyBackupTag::Initial))
    }

    /// Whether a `daily` record for `version` was taken on `date`
    pub fn has_daily_on(&self, version: u32, date: NaiveDate) -> CofferResult<bool> {
        Ok(self
            .list()?
            .iter()
            .any(|r| r.version == version && r.tag == KeyBackupTag::Daily && r.date() == date))
    }

    /// Load the key material stored in `record`
    pub fn read(&self, record: &KeyBackupRecord) -> CofferResult<KeyMaterial> {
        let key = read_fixed(&self.key_path(record))?;
        let salt = read_fixed(&self.salt_path(record))?;

        let metadata_path = self.metadata_path(record);
        let metadata = if metadata_path.exists() {
            read_json_required::<KeyMetadata, _>(&metadata_path).map_err(|e| {
                CofferError::KeyIncompatible(format!("unreadable key backup metadata: {}", e))
            })?
        } else {
            warn!(record = %record.name, "key backup metadata missing, using record version");
            KeyMetadata::new(record.version)
        };

        if metadata.version != record.version {
            return Err(CofferError::KeyIncompatible(format!(
                "key backup {} records version {} in its metadata",
                record.name, metadata.version
            )));
        }

        Ok(KeyMaterial::from_parts(key, salt, metadata))
    }
}
