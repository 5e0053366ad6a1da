//! Stage pipeline error types.

use thiserror::Error;

pub type StageResult<T> = Result<T, StageError>;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors from compiling, shipping, or running a stage bundle.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid stage definition: {0}")]
    InvalidStageDefinition(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("bundle io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote shell error: {0}")]
    Remote(#[from] RemoteError),
}

/// The remote shell could not be driven at all. A command that ran and
/// exited nonzero is not an error.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        source: std::io::Error,
    },
}
