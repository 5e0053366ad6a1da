//! Cloud inventory error types.

use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Error)]
pub enum CloudError {
    /// Listing kept failing after the retry budget was spent.
    #[error("unable to get pool information: {0}")]
    PoolInformation(String),

    #[error("no template matches {0:?}")]
    TemplateNotFound(String),

    #[error("several templates match {name:?}: {matches:?}")]
    SeveralTemplatesMatch { name: String, matches: Vec<String> },

    #[error("vm not found: {0}")]
    VmNotFound(String),

    #[error("cloud command failed: {0}")]
    Command(String),

    #[error("unexpected cloud response: {0}")]
    Parse(String),
}

impl CloudError {
    /// Operator mistakes; retrying cannot fix these.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::TemplateNotFound(_) | Self::SeveralTemplatesMatch { .. })
    }
}
