//! Error types for container-engine operations.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected engine output: {0}")]
    Parse(String),

    #[error("engine error: {0}")]
    Other(String),
}
