//! Periodic backup cycles
//!
//! [`run_cycle`] is one scheduled cycle (archive, retention, daily key
//! backup) and is what an external scheduler such as cron should call.
//! [`BackupScheduler`] runs cycles on a background thread.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{CofferError, CofferResult};
use crate::keys::{KeyBackupRecord, KeyManager};
use crate::storage::OperationLock;

use super::archive::BackupKind;
use super::manager::{BackupEngine, BackupReport, BackupRequest, CancelToken};

/// Outcome of one scheduled cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub backup: BackupReport,
    /// Daily key backup taken in this cycle, if one was due
    pub key_backup: Option<KeyBackupRecord>,
}

/// Run one scheduled cycle
///
/// The archive step is required; a failed daily key backup is logged and
/// does not fail the cycle.
pub fn run_cycle(
    engine: &BackupEngine,
    keys: &KeyManager,
    cancel: &CancelToken,
) -> CofferResult<CycleReport> {
    let backup = engine
        .create_backup_with(BackupRequest::new(BackupKind::Scheduled).with_cancel(cancel.clone()))?;

    let key_backup = match keys.backup_daily() {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "daily key backup failed");
            None
        }
    };

    Ok(CycleReport { backup, key_backup })
}

/// Background thread running [`run_cycle`] at a fixed interval
///
/// Only one scheduler may run per backup directory.
pub struct BackupScheduler {
    handle: Option<JoinHandle<u64>>,
    stop: Sender<()>,
    cancel: CancelToken,
}

impl BackupScheduler {
    /// Start the scheduler; the first cycle runs immediately
    ///
    /// With `iterations` the thread exits on its own after that many cycles.
    pub fn start(
        engine: Arc<BackupEngine>,
        keys: Arc<KeyManager>,
        interval: Duration,
        iterations: Option<u64>,
    ) -> CofferResult<Self> {
        let instance = OperationLock::acquire(&engine.backup_dir().join(".scheduler.lock"))
            .map_err(|_| CofferError::Busy("a backup scheduler is already running".into()))?;

        let (stop, stop_rx) = mpsc::channel::<()>();
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("coffer-scheduler".into())
            .spawn(move || {
                let _instance = instance;
                let mut cycles = 0u64;
                loop {
                    if thread_cancel.is_cancelled() {
                        break;
                    }

                    match run_cycle(&engine, &keys, &thread_cancel) {
                        Ok(report) => info!(
                            archive = %report.backup.backup.filename,
                            pruned = report.backup.pruned.len(),
                            key_backup = report.key_backup.is_some(),
                            "scheduled cycle complete"
                        ),
                        Err(CofferError::Busy(reason)) => {
                            warn!(%reason, "another operation is running; cycle skipped")
                        }
                        Err(CofferError::Cancelled) => break,
                        Err(e) => error!(error = %e, "scheduled cycle failed"),
                    }
                    cycles += 1;

                    if iterations.is_some_and(|n| cycles >= n) {
                        break;
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!(cycles, "scheduler stopped");
                cycles
            })
            .map_err(|e| CofferError::Io(format!("Failed to start scheduler thread: {}", e)))?;

        info!(interval_secs = interval.as_secs(), "scheduler started");
        Ok(Self {
            handle: Some(handle),
            stop,
            cancel,
        })
    }

    /// Let the current cycle finish, then exit
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// Abandon an in-flight backup before it commits, then exit
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the thread; returns the number of cycles run
    pub fn join(mut self) -> CofferResult<u64> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CofferError::Io("scheduler thread panicked".into())),
            None => Ok(0),
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manager::tests::fixture;
    use crate::crypto::KdfParams;
    use crate::keys::KeyBackupTag;

    fn key_manager(f: &crate::backup::manager::tests::Fixture) -> KeyManager {
        let keys = KeyManager::new(&f.paths, KdfParams::with_values(1024, 1, 1));
        keys.generate(false).unwrap();
        keys
    }

    #[test]
    fn test_run_cycle() {
        let f = fixture();
        let keys = key_manager(&f);

        let report = run_cycle(&f.engine, &keys, &CancelToken::new()).unwrap();
        assert_eq!(report.backup.backup.kind, BackupKind::Scheduled);
        assert_eq!(report.key_backup.unwrap().tag, KeyBackupTag::Daily);

        let again = run_cycle(&f.engine, &keys, &CancelToken::new()).unwrap();
        assert!(again.key_backup.is_none());
        assert_eq!(f.engine.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_run_cycle_busy() {
        let f = fixture();
        let keys = key_manager(&f);
        let _held = OperationLock::acquire(&f.paths.operation_lock()).unwrap();

        assert!(matches!(
            run_cycle(&f.engine, &keys, &CancelToken::new()),
            Err(CofferError::Busy(_))
        ));
    }

    #[test]
    fn test_scheduler_runs_fixed_iterations() {
        let f = fixture();
        let keys = key_manager(&f);
        let paths = f.paths.clone();
        let engine = Arc::new(f.engine);

        let scheduler = BackupScheduler::start(
            Arc::clone(&engine),
            Arc::new(keys),
            Duration::from_millis(10),
            Some(3),
        )
        .unwrap();
        assert_eq!(scheduler.join().unwrap(), 3);
        assert_eq!(engine.list_backups().unwrap().len(), 3);
        assert!(paths.backup_dir().join(".scheduler.lock").exists());
    }

    #[test]
    fn test_stop_ends_the_loop() {
        let f = fixture();
        let keys = key_manager(&f);
        let engine = Arc::new(f.engine);

        let scheduler =
            BackupScheduler::start(Arc::clone(&engine), Arc::new(keys), Duration::from_secs(3600), None)
                .unwrap();
        // Make sure the immediate first cycle has run
        while engine.list_backups().unwrap().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();
        assert_eq!(scheduler.join().unwrap(), 1);
    }

    #[test]
    fn test_single_instance() {
        let f = fixture();
        let keys = Arc::new(key_manager(&f));
        let engine = Arc::new(f.engine);

        let first =
            BackupScheduler::start(Arc::clone(&engine), Arc::clone(&keys), Duration::from_secs(3600), None)
                .unwrap();
        let second =
            BackupScheduler::start(Arc::clone(&engine), Arc::clone(&keys), Duration::from_secs(3600), None);
        assert!(matches!(second, Err(CofferError::Busy(_))));

        first.cancel();
        first.join().unwrap();
    }
}
