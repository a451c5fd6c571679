//! Working data store access
//!
//! The engine never interprets the store; it only needs a consistent byte
//! copy of the current file and a way to atomically replace it.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{CofferError, CofferResult};

use super::file_io::{commit_staged, write_staged};

/// Primitives the backup engine needs from the data store
pub trait DataStore: Send + Sync {
    /// Location of the working store file
    fn path(&self) -> &Path;

    /// Whether the working store currently exists
    fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Consistent byte copy of the current store
    fn read_snapshot(&self) -> CofferResult<Vec<u8>>;

    /// Atomically replace the store with `bytes`
    fn replace(&self, bytes: &[u8]) -> CofferResult<()>;
}

/// A single-file store guarded by an advisory lock file
///
/// Readers and the replacement both hold an exclusive lock on
/// `<store>.lock` for their (short) duration, so a snapshot never observes a
/// half-written file and a replacement never races a snapshot.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Create a store handle for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    /// Path of the advisory lock file
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn lock(&self) -> CofferResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| CofferError::Storage(format!("Failed to open store lock: {}", e)))?;
        file.lock_exclusive()
            .map_err(|e| CofferError::Storage(format!("Failed to lock store: {}", e)))?;
        Ok(file)
    }
}

impl DataStore for FileStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_snapshot(&self) -> CofferResult<Vec<u8>> {
        let guard = self.lock()?;
        let result = fs::read(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CofferError::NotFound {
                    entity_type: "Store",
                    identifier: self.path.display().to_string(),
                }
            } else {
                CofferError::Storage(format!("Failed to read {}: {}", self.path.display(), e))
            }
        });
        let _ = FileExt::unlock(&guard);
        let bytes = result?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "store snapshot taken");
        Ok(bytes)
    }

    fn replace(&self, bytes: &[u8]) -> CofferResult<()> {
        let staged = write_staged(&self.path, bytes)?;
        let guard = match self.lock() {
            Ok(guard) => guard,
            Err(e) => {
                let _ = fs::remove_file(&staged);
                return Err(e);
            }
        };
        let result = commit_staged(&staged, &self.path);
        let _ = FileExt::unlock(&guard);
        result?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "store replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_and_replace() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("patrimoine.db");
        fs::write(&path, b"SQLite format 3\0original").unwrap();

        let store = FileStore::new(&path);
        assert!(store.exists());
        assert_eq!(store.read_snapshot().unwrap(), b"SQLite format 3\0original");

        store.replace(b"restored").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"restored");
    }

    #[test]
    fn test_missing_store_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("absent.db"));

        assert!(!store.exists());
        let err = store.read_snapshot().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_replace_creates_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("data").join("new.db"));

        store.replace(b"fresh").unwrap();
        assert_eq!(store.read_snapshot().unwrap(), b"fresh");
    }

    #[test]
    fn test_lock_path_sits_next_to_store() {
        let store = FileStore::new("/var/lib/coffer/data/patrimoine.db");
        assert_eq!(
            store.lock_path(),
            Path::new("/var/lib/coffer/data/patrimoine.db.lock")
        );
    }
}
