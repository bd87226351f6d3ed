//! Deployment lock — one deployment per working directory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::LockError;
use crate::layout;

/// Exclusive advisory lock on `<workdir>/.deploy.lock`.
///
/// Acquisition is a single non-blocking attempt. The lock is released when
/// the guard is dropped, and by the kernel if the process dies.
#[derive(Debug)]
pub struct DeployLock {
    file: File,
    path: PathBuf,
}

impl DeployLock {
    pub fn acquire(workdir: &Path) -> Result<Self, LockError> {
        let path = layout::lock_path(workdir);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(workdir).map_err(io_err)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "deploy lock acquired");
                Ok(Self { file, path })
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(LockError::Contended(path))
            }
            Err(e) => Err(io_err(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "deploy lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_contended() {
        let dir = tempfile::tempdir().unwrap();
        let _held = DeployLock::acquire(dir.path()).unwrap();

        let err = DeployLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, LockError::Contended(_)), "got {err:?}");
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let held = DeployLock::acquire(dir.path()).unwrap();
        drop(held);
        DeployLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn different_workdirs_do_not_contend() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let _la = DeployLock::acquire(a.path()).unwrap();
        let _lb = DeployLock::acquire(b.path()).unwrap();
    }

    #[test]
    fn creates_missing_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("srv/shop");
        let lock = DeployLock::acquire(&workdir).unwrap();
        assert!(lock.path().exists());
    }
}
