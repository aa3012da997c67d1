//! Folder ownership through an advisory lock on a sentinel file.
//!
//! Only one process may scan or process a folder at a time. The lock is
//! released, and the sentinel removed, when the owner calls `release` or drops
//! the `LockFile`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, warn};

/// Sentinel file name used when the caller does not pick one.
pub const DEFAULT_LOCK_FILE_NAME: &str = "__FOLDER.lock";

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// This object already holds the lock.
    #[error("lock already acquired")]
    AlreadyAcquired {
        /// Sentinel file.
        path: PathBuf,
    },
    /// Another owner holds the lock.
    #[error("folder is locked by another owner")]
    Locked {
        /// Sentinel file.
        path: PathBuf,
    },
    /// The sentinel could not be opened or created.
    #[error("failed to open lock file")]
    Open {
        /// Sentinel file.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Locking failed for a reason other than contention.
    #[error("failed to lock file")]
    Acquire {
        /// Sentinel file.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
}

/// Exclusive advisory lock on a sentinel file inside a folder.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

impl LockFile {
    /// Lock object for `folder` using [`DEFAULT_LOCK_FILE_NAME`].
    #[must_use]
    pub fn new(folder: &Path) -> Self {
        Self::with_name(folder, DEFAULT_LOCK_FILE_NAME)
    }

    /// Lock object for `folder` using a custom sentinel name.
    #[must_use]
    pub fn with_name(folder: &Path, name: &str) -> Self {
        Self {
            path: folder.join(name),
            file: None,
        }
    }

    /// Sentinel file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this object currently holds the lock.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        self.file.is_some()
    }

    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(false)` when another owner holds the lock and
    /// `return_status` is set.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Locked`] on contention when `return_status` is
    /// unset, [`LockError::AlreadyAcquired`] when this object holds the lock,
    /// and IO failures otherwise.
    pub fn acquire(&mut self, return_status: bool) -> Result<bool, LockError> {
        if self.file.is_some() {
            return Err(LockError::AlreadyAcquired {
                path: self.path.clone(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| LockError::Open {
                path: self.path.clone(),
                source,
            })?;

        // Qualified: std's inherent `File::try_lock_exclusive` shadows the fs2 method.
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %self.path.display(), "folder lock acquired");
                self.file = Some(file);
                Ok(true)
            }
            Err(err) if is_contended(&err) => {
                drop(file);
                if return_status {
                    Ok(false)
                } else {
                    Err(LockError::Locked {
                        path: self.path.clone(),
                    })
                }
            }
            Err(source) => Err(LockError::Acquire {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Release the lock and delete the sentinel. Every failure is logged and swallowed.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        if let Err(err) = FileExt::unlock(&file) {
            warn!(path = %self.path.display(), error = %err, "failed to unlock folder lock");
        }
        drop(file);

        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %err, "failed to delete lock file");
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

pub(crate) fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_owner_is_rejected_until_release() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut first = LockFile::new(temp.path());
        let mut second = LockFile::new(temp.path());

        assert!(first.acquire(false)?);
        assert!(first.path().exists());
        assert!(!second.acquire(true)?);
        assert!(matches!(
            second.acquire(false),
            Err(LockError::Locked { .. })
        ));

        first.release();
        assert!(!first.path().exists());
        assert!(second.acquire(false)?);
        Ok(())
    }

    #[test]
    fn double_acquire_on_same_object_fails() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut lock = LockFile::with_name(temp.path(), "custom.lock");
        assert!(lock.acquire(true)?);
        assert!(matches!(
            lock.acquire(true),
            Err(LockError::AlreadyAcquired { .. })
        ));
        Ok(())
    }

    #[test]
    fn drop_releases_and_removes_sentinel() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = {
            let mut lock = LockFile::new(temp.path());
            lock.acquire(false)?;
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
        let mut again = LockFile::new(temp.path());
        assert!(again.acquire(false)?);
        Ok(())
    }

    #[test]
    fn release_without_acquire_keeps_foreign_sentinel() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut owner = LockFile::new(temp.path());
        owner.acquire(false)?;
        let mut other = LockFile::new(temp.path());
        other.release();
        assert!(owner.path().exists());
        Ok(())
    }

    #[test]
    fn missing_folder_reports_open_error() {
        let mut lock = LockFile::new(Path::new("/definitely/missing/folder"));
        assert!(matches!(lock.acquire(true), Err(LockError::Open { .. })));
    }
}
