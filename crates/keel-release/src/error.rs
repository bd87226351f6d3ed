//! Error types for the release store and deployment lock.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for release store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or mutating the release catalog.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("release {0} already exists; versions must be unique")]
    ReleaseExists(String),

    #[error("release {0} not found")]
    ReleaseNotFound(String),

    #[error("release {0} is referenced by the {1} pointer and cannot be aborted")]
    ReleaseInUse(String, &'static str),

    #[error("pointer {} does not name a release: {reason}", path.display())]
    BadPointer { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}

/// Errors from acquiring the deployment lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another deployment is in progress (lock held on {})", .0.display())]
    Contended(PathBuf),

    #[error("failed to open lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
