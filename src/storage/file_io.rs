//! File I/O utilities with atomic writes
//!
//! Provides safe file operations that won't corrupt data on failure. Every
//! replacement goes through a uniquely named temp file in the destination
//! directory followed by a rename, so readers see either the old file or the
//! new one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CofferError;

/// Read JSON from a file, returning an error if file doesn't exist
pub fn read_json_required<T, P>(path: P) -> Result<T, CofferError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let file = File::open(path)
        .map_err(|e| CofferError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| CofferError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write JSON to a file atomically
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), CofferError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| CofferError::Storage(format!("Failed to serialize data: {}", e)))?;
    write_bytes_atomic(path, &json)
}

/// Staging path next to `path` (same directory, so rename stays atomic)
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// Write bytes to a file atomically (write to temp, sync, then rename)
pub fn write_bytes_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), CofferError> {
    let path = path.as_ref();
    let temp_path = write_staged(path, bytes)?;
    commit_staged(&temp_path, path)
}

/// Write bytes to a fresh staging file and return its path
///
/// The staged file is synced to disk before this returns. Nothing is left
/// behind if writing fails.
pub fn write_staged(path: &Path, bytes: &[u8]) -> Result<PathBuf, CofferError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CofferError::Storage(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = staging_path(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = open_private(&temp_path, OpenOptions::new().write(true).create_new(true))?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(CofferError::Storage(format!(
            "Failed to write staging file for {}: {}",
            path.display(),
            e
        )));
    }

    Ok(temp_path)
}

/// Atomically move a staged file into place
pub fn commit_staged(temp_path: &Path, path: &Path) -> Result<(), CofferError> {
    fs::rename(temp_path, path).map_err(|e| {
        // Try to clean up temp file if rename fails
        let _ = fs::remove_file(temp_path);
        CofferError::Storage(format!(
            "Failed to move staging file into {}: {}",
            path.display(),
            e
        ))
    })?;
    sync_parent(path);
    Ok(())
}

/// Write bytes to a file that must not exist yet
///
/// Used for immutable records; an existing file is never overwritten.
pub fn write_new(path: &Path, bytes: &[u8]) -> Result<(), CofferError> {
    let mut file = open_private(path, OpenOptions::new().write(true).create_new(true))
        .map_err(|e| CofferError::Storage(format!("Failed to create {}: {}", path.display(), e)))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| CofferError::Storage(format!("Failed to write {}: {}", path.display(), e)))
}

/// Open a file readable only by the owner on Unix
fn open_private(path: &Path, options: &mut OpenOptions) -> std::io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Persist the rename itself on filesystems that need a directory fsync
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct TestData {
        name: String,
        value: i32,
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn test_write_and_read_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_json_atomic(&path, &data).unwrap();
        let loaded: TestData = read_json_required(&path).unwrap();
        assert_eq!(data, loaded);
    }

    #[test]
    fn test_read_json_required_missing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.json");
        assert!(read_json_required::<TestData, _>(&path).is_err());
    }

    #[test]
    fn test_atomic_write_no_temp_file_left() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.db");

        write_bytes_atomic(&path, b"first").unwrap();
        write_bytes_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(leftover_temp_files(temp_dir.path()), 0);
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("blob");

        write_bytes_atomic(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_staged_file_invisible_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("archive.enc");

        let staged = write_staged(&path, b"payload").unwrap();
        assert!(staged.exists());
        assert!(!path.exists());

        commit_staged(&staged, &path).unwrap();
        assert!(!staged.exists());
        assert_eq!(fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn test_write_new_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("record");

        write_new(&path, b"original").unwrap();
        assert!(write_new(&path, b"replacement").is_err());
        assert_eq!(fs::read(&path).unwrap(), b"original");
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".key");
        write_bytes_atomic(&path, &[7u8; 32]).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
