//! Error types for the node status store.

use thiserror::Error;

/// Result type alias for status store lookups.
pub type StatusResult<T> = Result<T, StatusError>;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("unknown isolate: {0}")]
    UnknownIsolate(String),
}
