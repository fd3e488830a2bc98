//! Single-instance guard.
//!
//! Only one scheduler may drive a database at a time. The guard holds an
//! exclusive advisory lock on `<database>.lock` until dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

/// Errors taking the instance lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock file could not be opened.
    #[error("cannot open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another process holds the lock.
    #[error(
        "another podfetch instance is already running against this database (lock: {path})\n  Suggestion: wait for it to finish or remove a stale lock file"
    )]
    AlreadyRunning { path: PathBuf },
}

/// Exclusive instance lock; released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Locks `<database>.lock` next to `database_path`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::AlreadyRunning`] if another process holds it.
    pub fn acquire(database_path: &Path) -> Result<Self, LockError> {
        let path = lock_path_for(database_path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyRunning { path });
        }
        debug!(path = %path.display(), "instance lock acquired");
        Ok(Self { file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// `claims.db` -> `claims.db.lock`.
#[must_use]
pub fn lock_path_for(database_path: &Path) -> PathBuf {
    let mut name = database_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
