//! Exclusive ownership of a pool directory.
//!
//! An fs2 advisory lock on `<root>/LOCK`, taken without blocking. The lock
//! is per open file description, so a second open of the same pool fails
//! whether it comes from this process or another one. Released on Drop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{KvError, KvResult};

pub const LOCK_FILE: &str = "LOCK";

pub struct PoolLock {
    file: File,
    path: PathBuf,
}

impl PoolLock {
    /// Take the lock for `root`, failing with `InvalidArgument` when another
    /// handle holds it.
    pub fn acquire(root: &Path) -> KvResult<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| KvError::io(&path, e, "failed to open lock file"))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(KvError::invalid(format!(
                "pool {} is already open",
                root.display()
            ))),
            Err(e) => Err(KvError::io(&path, e, "failed to lock pool")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        // Unlock errors are ignored; closing the descriptor drops the lock anyway.
        let _ = FileExt::unlock(&self.file);
    }
}

impl std::fmt::Debug for PoolLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLock").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails() {
        let dir = TempDir::new().unwrap();
        let first = PoolLock::acquire(dir.path()).unwrap();
        assert!(first.path().ends_with(LOCK_FILE));

        let err = PoolLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);

        drop(first);
        PoolLock::acquire(dir.path()).unwrap();
    }
}
