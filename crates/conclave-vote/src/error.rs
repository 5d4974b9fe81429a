//! Vote error types.

use thiserror::Error;

/// Result type alias for vote operations.
pub type VoteResult<T> = Result<T, VoteError>;

/// Errors that can occur before a vote starts. A running vote never fails:
/// unresolvable elections fall back to the default candidate.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("unknown vote engine: {0}")]
    UnknownEngine(String),
}
