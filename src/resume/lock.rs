//! Single-process guard for a state directory
//!
//! Two pipelines writing the same queue would interleave their snapshots, so
//! a run holds an exclusive advisory lock on `<state_dir>/pipeline.lock` for
//! its whole lifetime.

use super::store::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "pipeline.lock";

/// Exclusive lock on a state directory, released on drop
#[derive(Debug)]
pub struct ResumeLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl ResumeLock {
    /// Take the lock or fail immediately if another process holds it
    pub fn try_acquire(state_dir: &Path) -> Result<Self, ResumeError> {
        std::fs::create_dir_all(state_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let path = state_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let guard = lock.try_write().map_err(|e| {
            ResumeError::LockError(format!(
                "State directory {} is in use by another run: {e}",
                state_dir.display()
            ))
        })?;
        // The flock lives as long as the file handle; the guard would unlock early
        std::mem::forget(guard);

        debug!(path = %path.display(), "Acquired state directory lock");
        Ok(Self { _lock: lock, path })
    }

    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}
