//! Run-long advisory lock on the ledger
//!
//! Two runs writing the same output tree would hand out the same subject and
//! session numbers, so a run holds this lock from start to finish. The lock
//! file is distinct from the one [`super::SubjectLedger::save`] uses.

use super::LedgerError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock held for the duration of a run
#[derive(Debug)]
pub struct LedgerLock {
    #[allow(dead_code)]
    lock: RwLock<File>,
    path: PathBuf,
}

/// Lock file used for a ledger at `ledger_path`
pub fn run_lock_path(ledger_path: &Path) -> PathBuf {
    ledger_path.with_extension("run.lock")
}

impl LedgerLock {
    fn open(ledger_path: &Path) -> Result<(RwLock<File>, PathBuf), LedgerError> {
        if let Some(parent) = ledger_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_path = run_lock_path(ledger_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| LedgerError::LockError(format!("Failed to open lock file: {e}")))?;
        Ok((RwLock::new(file), lock_path))
    }

    /// Acquire the lock or fail immediately if another run holds it
    pub fn try_acquire(ledger_path: &Path) -> Result<Self, LedgerError> {
        let (mut lock, path) = Self::open(ledger_path)?;
        let guard = lock.try_write().map_err(|e| {
            LedgerError::LockError(format!(
                "{} is held by another run: {e}",
                path.display()
            ))
        })?;
        std::mem::forget(guard);

        debug!(path = %path.display(), "Ledger lock acquired");
        Ok(Self { lock, path })
    }

    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}
