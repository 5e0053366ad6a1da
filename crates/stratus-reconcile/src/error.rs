//! Reconciliation error types.

use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("backend error: {0}")]
    Backend(#[from] stratus_backend::BackendError),

    #[error("cloud error: {0}")]
    Cloud(#[from] stratus_cloud::CloudError),

    #[error("host probe failed on {host}: {reason}")]
    Probe { host: String, reason: String },

    #[error("archive error: {0}")]
    Archive(#[from] std::io::Error),
}
