//! Error types for plan compilation and artifact handling.

use std::path::PathBuf;

use thiserror::Error;

use keel_core::ValidationError;
use keel_engine::EngineError;

/// Result type alias for plan operations.
pub type PlanResult<T> = Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("resolving application definition: {0}")]
    Resolve(#[from] EngineError),

    #[error("resolved application definition is not usable: {0}")]
    Definition(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plan encoding: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt plan in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("definition checksum mismatch: plan says {expected}, content hashes to {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl PlanError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| PlanError::Io { path, source }
    }
}
