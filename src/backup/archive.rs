//! Archive container and on-disk envelope
//!
//! An archive is a zip container holding `metadata.json` and `snapshot.db`,
//! encoded with the field cipher. On disk the token is preceded by a short
//! cleartext header naming the key version, so a restore can tell "wrong
//! key" from "damaged file":
//!
//! ```text
//! +--------+---------+------------------+----------------------+
//! | "CFAR" | format  | key version (BE) | field cipher token   |
//! | 4      | 1       | 4                | ...                  |
//! +--------+---------+------------------+----------------------+
//! ```

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::crypto::FieldCipher;
use crate::error::{CofferError, CofferResult};

/// Entry holding the raw store bytes
pub const SNAPSHOT_ENTRY: &str = "snapshot.db";
/// Entry holding [`ArchiveMetadata`] as JSON
pub const METADATA_ENTRY: &str = "metadata.json";
/// Extension of committed archives
pub const ARCHIVE_SUFFIX: &str = ".zip.enc";

const ENVELOPE_MAGIC: &[u8; 4] = b"CFAR";
const ENVELOPE_FORMAT: u8 = 1;
const ENVELOPE_HEADER_LEN: usize = 4 + 1 + 4;
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Why an archive was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Periodic cycle; subject to retention
    Scheduled,
    /// Operator request or pre-restore safety net; never pruned
    Manual,
    /// First archive of an installation; never pruned
    Initial,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Scheduled => "scheduled",
            BackupKind::Manual => "manual",
            BackupKind::Initial => "initial",
        }
    }

    /// Whether retention may delete archives of this kind
    pub fn is_prunable(&self) -> bool {
        matches!(self, BackupKind::Scheduled)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = CofferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(BackupKind::Scheduled),
            "manual" => Ok(BackupKind::Manual),
            "initial" => Ok(BackupKind::Initial),
            other => Err(CofferError::Validation(format!("unknown backup kind '{}'", other))),
        }
    }
}

/// Metadata packed next to the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Store schema version at backup time
    pub schema_version: u32,
    /// Version of the key the archive was encrypted with
    pub key_version: u32,
    /// Hex SHA-256 of the raw snapshot
    pub integrity_hash: String,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    /// File name of the store the snapshot was taken from
    pub store_name: String,
    pub snapshot_size: u64,
}

/// Hex SHA-256 of `bytes`
pub fn integrity_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Build the zip container
pub fn pack(snapshot: &[u8], metadata: &ArchiveMetadata) -> CofferResult<Vec<u8>> {
    let metadata_json = serde_json::to_vec_pretty(metadata)?;

    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o600);
    if let Some(mtime) = zip_time(metadata.created_at) {
        options = options.last_modified_time(mtime);
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    append_entry(&mut writer, METADATA_ENTRY, &metadata_json, options)?;
    append_entry(&mut writer, SNAPSHOT_ENTRY, snapshot, options)?;

    writer
        .finish()
        .map(Cursor::into_inner)
        .map_err(|e| CofferError::BackupIo(format!("Failed to build archive container: {}", e)))
}

fn append_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    data: &[u8],
    options: SimpleFileOptions,
) -> CofferResult<()> {
    writer
        .start_file(name, options)
        .map_err(|e| CofferError::BackupIo(format!("Failed to add {} to archive: {}", name, e)))?;
    writer
        .write_all(data)
        .map_err(|e| CofferError::BackupIo(format!("Failed to write {} to archive: {}", name, e)))
}

/// Zip timestamps cover 1980..=2107 only
fn zip_time(at: DateTime<Utc>) -> Option<zip::DateTime> {
    let year = u16::try_from(at.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
    .ok()
}

/// Split a container back into snapshot bytes and metadata
pub fn unpack(container: &[u8]) -> CofferResult<(Vec<u8>, ArchiveMetadata)> {
    let malformed = |e: ZipError| CofferError::BackupIo(format!("Malformed archive container: {}", e));

    let mut archive = ZipArchive::new(Cursor::new(container)).map_err(malformed)?;
    for name in archive.file_names() {
        if name != SNAPSHOT_ENTRY && name != METADATA_ENTRY {
            debug!(entry = name, "ignoring unknown archive entry");
        }
    }

    let metadata_json = read_entry(&mut archive, METADATA_ENTRY)?;
    let metadata = serde_json::from_slice::<ArchiveMetadata>(&metadata_json)?;
    let snapshot = read_entry(&mut archive, SNAPSHOT_ENTRY)?;
    Ok((snapshot, metadata))
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> CofferResult<Vec<u8>> {
    let mut entry = archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => {
            CofferError::BackupIo(format!("archive container has no {}", name))
        }
        other => CofferError::BackupIo(format!("Malformed archive container: {}", other)),
    })?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| CofferError::BackupIo(format!("Failed to read {} from archive: {}", name, e)))?;
    Ok(data)
}

/// Encrypt a container and prepend the envelope header
pub fn seal(container: &[u8], cipher: &FieldCipher) -> CofferResult<Vec<u8>> {
    let token = cipher.encode(container)?;
    let mut sealed = Vec::with_capacity(ENVELOPE_HEADER_LEN + token.len());
    sealed.extend_from_slice(ENVELOPE_MAGIC);
    sealed.push(ENVELOPE_FORMAT);
    sealed.extend_from_slice(&cipher.key_version().to_be_bytes());
    sealed.extend_from_slice(&token);
    Ok(sealed)
}

/// Split an archive file into its recorded key version and token
///
/// The header is not authenticated; callers must treat the version as a
/// hint until the token decodes.
pub fn open_envelope(bytes: &[u8]) -> CofferResult<(u32, &[u8])> {
    if bytes.len() < ENVELOPE_HEADER_LEN
        || &bytes[..4] != ENVELOPE_MAGIC
        || bytes[4] != ENVELOPE_FORMAT
    {
        return Err(CofferError::integrity(
            "coffer archive header",
            "unrecognized or damaged header",
        ));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[5..ENVELOPE_HEADER_LEN]);
    Ok((u32::from_be_bytes(version), &bytes[ENVELOPE_HEADER_LEN..]))
}

/// `{kind}_backup_{YYYYMMDD_HHMMSS}.zip.enc` (UTC, second precision)
pub fn archive_file_name(kind: BackupKind, at: DateTime<Utc>) -> String {
    format!("{}_backup_{}{}", kind, at.format(STAMP_FORMAT), ARCHIVE_SUFFIX)
}

/// Parse an archive file name back into its kind and time stamp
pub fn parse_archive_file_name(name: &str) -> Option<(BackupKind, DateTime<Utc>)> {
    let stem = name.strip_suffix(ARCHIVE_SUFFIX)?;
    let (kind, stamp) = stem.split_once("_backup_")?;
    let kind: BackupKind = kind.parse().ok()?;

    if stamp.len() != 15 {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    Some((kind, DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::keys::KeyMaterial;
    use chrono::TimeZone;

    fn metadata_for(snapshot: &[u8]) -> ArchiveMetadata {
        ArchiveMetadata {
            schema_version: 1,
            key_version: 1,
            integrity_hash: integrity_hash(snapshot),
            created_at: Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap(),
            kind: BackupKind::Scheduled,
            store_name: "patrimoine.db".into(),
            snapshot_size: snapshot.len() as u64,
        }
    }

    #[test]
    fn test_integrity_hash_known_value() {
        assert_eq!(
            integrity_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pack_unpack() {
        let snapshot: Vec<u8> = (0..50_000).map(|i| (i % 251) as u8).collect();
        let metadata = metadata_for(&snapshot);

        let container = pack(&snapshot, &metadata).unwrap();
        assert_eq!(&container[..4], b"PK\x03\x04");

        let names: Vec<String> = ZipArchive::new(Cursor::new(container.as_slice()))
            .unwrap()
            .file_names()
            .map(str::to_string)
            .collect();
        assert!(names.contains(&METADATA_ENTRY.to_string()));
        assert!(names.contains(&SNAPSHOT_ENTRY.to_string()));

        let (unpacked, unpacked_metadata) = unpack(&container).unwrap();
        assert_eq!(unpacked, snapshot);
        assert_eq!(unpacked_metadata, metadata);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(matches!(unpack(b"not a zip"), Err(CofferError::BackupIo(_))));
    }

    #[test]
    fn test_unpack_requires_snapshot_entry() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(METADATA_ENTRY, SimpleFileOptions::default()).unwrap();
        writer
            .write_all(&serde_json::to_vec(&metadata_for(b"x")).unwrap())
            .unwrap();
        let container = writer.finish().unwrap().into_inner();

        let err = unpack(&container).unwrap_err();
        assert!(err.to_string().contains(SNAPSHOT_ENTRY));
    }

    #[test]
    fn test_envelope() {
        let cipher =
            FieldCipher::new(&KeyMaterial::generate_with(5, KdfParams::with_values(1024, 1, 1))).unwrap();
        let sealed = seal(b"container", &cipher).unwrap();
        assert_eq!(&sealed[..4], b"CFAR");

        let (version, token) = open_envelope(&sealed).unwrap();
        assert_eq!(version, 5);
        assert_eq!(cipher.decode(token).unwrap(), b"container");
    }

    #[test]
    fn test_damaged_envelope_header() {
        let mut bytes = b"CFAR\x01\x00\x00\x00\x01token".to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            open_envelope(&bytes),
            Err(CofferError::Integrity { .. })
        ));
        assert!(open_envelope(b"CF").is_err());
    }

    #[test]
    fn test_file_names() {
        let at = Utc.with_ymd_and_hms(2025, 10, 1, 8, 5, 9).unwrap();
        let name = archive_file_name(BackupKind::Manual, at);
        assert_eq!(name, "manual_backup_20251001_080509.zip.enc");
        assert_eq!(parse_archive_file_name(&name), Some((BackupKind::Manual, at)));

        // Sub-second precision is not part of the name
        let later = at + chrono::Duration::milliseconds(420);
        assert_eq!(archive_file_name(BackupKind::Manual, later), name);
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_archive_file_name("weekly_backup_20251001_080509.zip.enc").is_none());
        assert!(parse_archive_file_name("scheduled_backup_20251001_080509.tar.gz.enc").is_none());
        assert!(parse_archive_file_name("scheduled_backup_20251001_080509_042.zip.enc").is_none());
        assert!(parse_archive_file_name("scheduled_backup_20251301_080509.zip.enc").is_none());
        assert!(parse_archive_file_name(".operation.lock").is_none());
    }

    #[test]
    fn test_only_scheduled_is_prunable() {
        assert!(BackupKind::Scheduled.is_prunable());
        assert!(!BackupKind::Manual.is_prunable());
        assert!(!BackupKind::Initial.is_prunable());
    }
}
