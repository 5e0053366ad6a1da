//! Configuration error types.

use thiserror::Error;

use crate::config::ConfigIssues;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a pool configuration.
///
/// All of these are operator mistakes and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config keys: {0}")]
    Invalid(ConfigIssues),

    #[error("environment variable not set: {0}")]
    MissingEnv(String),

    #[error("invalid value: {0}")]
    Value(String),
}
