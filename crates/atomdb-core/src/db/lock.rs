use super::error::{DbError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// An exclusive advisory lock (`flock(2)` on Unix) held for the lifetime of the guard.
///
/// Dropping the guard closes the file descriptor, which releases the lock on every exit
/// path, including early returns and unwinding.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the lock on `path` is acquired, creating the lock file if needed.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        if file.try_lock_exclusive().is_err() {
            debug!(path = %path.display(), "Waiting for database lock.");
            file.lock_exclusive().map_err(|e| DbError::Lock {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        trace!(path = %path.display(), "Acquired database lock.");
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Attempts the lock without blocking; fails if another holder has it.
    #[cfg(test)]
    pub(crate) fn try_exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.try_lock_exclusive().map_err(|e| DbError::Lock {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        trace!(path = %self.path.display(), "Released database lock.");
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| DbError::Lock {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// The conventional lock file for a database: `<name>.lock` next to it.
pub fn lock_path_for(database: &Path) -> PathBuf {
    let mut name = database.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Runs `op` while holding the lock at `path`; `None` runs it unguarded.
pub fn with_lock<T>(path: Option<&Path>, op: impl FnOnce() -> Result<T>) -> Result<T> {
    match path {
        None => op(),
        Some(path) => {
            let _guard = FileLock::exclusive(path)?;
            op()
        }
    }
}
