//! Backend error types.

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached or returned nothing usable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("registration of {agent} failed: {reason}")]
    RegistrationFailed { agent: String, reason: String },

    /// A scraped page did not carry the marker every valid page has.
    #[error("page signature missing: {0}")]
    PageSignature(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("xml error: {0}")]
    Xml(String),
}

impl BackendError {
    /// Worth retrying: connection problems and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
