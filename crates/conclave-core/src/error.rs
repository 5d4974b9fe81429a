//! Error types for Conclave core types and configuration.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building components or loading configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid component name: {0:?}")]
    InvalidComponentName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
