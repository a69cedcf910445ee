//! Single-instance lock (§4.4.1): an exclusive advisory file lock
//! guaranteeing at most one active sync engine per user account.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;

use crate::error::{AppError, AppResult};

/// Holds the open file and its advisory lock for the engine's lifetime.
/// Dropping (or calling `release`) unlinks the lock file; the OS releases
/// the advisory lock on process exit regardless, which is what makes a
/// stale lock from a dead process reclaimable.
pub struct InstanceLock {
    path: PathBuf,
    file: Option<File>,
}

impl InstanceLock {
    /// Attempt to acquire the exclusive lock. On failure (another instance
    /// holds it), returns an error and touches nothing else — the caller
    /// must abort the engine start without side effects.
    pub fn acquire(lock_path: &Path, instance_label: &str) -> AppResult<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;

        file.try_lock_exclusive().map_err(|_| {
            AppError::Other(format!(
                "another sync engine instance already holds {}",
                lock_path.display()
            ))
        })?;

        let mut file = file;
        file.set_len(0)?;
        let contents = format!(
            "{}:{instance_label}:{}",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        file.write_all(contents.as_bytes())?;
        file.flush()?;

        Ok(Self {
            path: lock_path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Release the lock and unlink the file. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
            drop(file);
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autosync.lock");
        let _first = InstanceLock::acquire(&path, "a").unwrap();
        assert!(InstanceLock::acquire(&path, "b").is_err());
    }

    #[test]
    fn release_allows_a_subsequent_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autosync.lock");
        let mut first = InstanceLock::acquire(&path, "a").unwrap();
        first.release();
        assert!(InstanceLock::acquire(&path, "b").is_ok());
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autosync.lock");
        {
            let _first = InstanceLock::acquire(&path, "a").unwrap();
        }
        assert!(InstanceLock::acquire(&path, "b").is_ok());
    }
}
