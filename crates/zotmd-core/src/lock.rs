//! Run exclusivity and cancellation
//!
//! [`RunLock`] holds an exclusive advisory lock on `<data_dir>/zotmd.lock`
//! for the duration of a run. The OS releases advisory locks when the holding
//! process exits, so a lock file left behind by a crashed run is simply
//! locked again by the next one.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fs2::FileExt;

use crate::error::SyncError;

/// Exclusive lock on the state store and output tree
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting
    ///
    /// Fails with [`SyncError::Locked`] when a live process holds it.
    pub fn acquire(path: &Path) -> Result<Self, SyncError> {
        let lock_err = |source| SyncError::Lock {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(lock_err)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                || e.kind() == std::io::ErrorKind::WouldBlock
            {
                let pid = read_pid(&mut file);
                return Err(SyncError::Locked {
                    path: path.to_path_buf(),
                    pid,
                });
            }
            return Err(lock_err(e));
        }

        // Record the holder for diagnostics
        file.set_len(0).map_err(lock_err)?;
        file.seek(SeekFrom::Start(0)).map_err(lock_err)?;
        writeln!(file, "{}", std::process::id()).map_err(lock_err)?;
        file.sync_all().map_err(lock_err)?;

        tracing::debug!("Acquired run lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release run lock {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("Released run lock {}", self.path.display());
        }
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

/// Cooperative cancellation shared between the CLI and the engine
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zotmd.lock");

        let held = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        match err {
            SyncError::Locked { pid, .. } => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected Locked, got {other:?}"),
        }

        drop(held);
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_stale_lock_file_is_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zotmd.lock");

        // Left behind by a process that no longer holds the lock
        fs::write(&path, "999999\n").unwrap();

        let lock = RunLock::acquire(&path).unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_lock_creates_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("zotmd.lock");
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}
