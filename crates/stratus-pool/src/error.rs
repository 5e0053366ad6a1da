//! Pool controller error types.

use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("cloud error: {0}")]
    Cloud(#[from] stratus_cloud::CloudError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] stratus_reconcile::ReconcileError),

    #[error("stage error: {0}")]
    Stage(#[from] stratus_stages::StageError),

    #[error("invalid partition size: {0}")]
    InvalidPartition(u32),
}
