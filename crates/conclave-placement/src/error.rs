//! Error types for the placement scheduler.

use conclave_core::CoreError;
use conclave_state::StatusError;
use conclave_vote::VoteError;
use thiserror::Error;

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("vote failed: {0}")]
    Vote(#[from] VoteError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
