//! Single-instance lock for backup and restore
//!
//! At most one backup or restore may run at a time, across processes and
//! within one process. The lock is an exclusive advisory lock on a file in
//! the archive directory and is released when the guard is dropped.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{CofferError, CofferResult};

/// Guard holding the operation lock
#[derive(Debug)]
pub struct OperationLock {
    file: File,
    path: PathBuf,
}

impl OperationLock {
    /// Try to take the lock without waiting
    ///
    /// Returns [`CofferError::Busy`] if another operation holds it.
    pub fn acquire(path: &Path) -> CofferResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| CofferError::Io(format!("Failed to open operation lock: {}", e)))?;

        file.try_lock_exclusive().map_err(|_| {
            CofferError::Busy(format!(
                "another backup or restore is running (lock: {})",
                path.display()
            ))
        })?;

        debug!(lock = %path.display(), "operation lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "operation lock released");
    }
}
