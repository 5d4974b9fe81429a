//! Conclave placement scheduler — components into isolates, by election.
//!
//! Each component of a composition is placed by a vote among the isolates
//! that could host it, the criteria of `conclave-criteria` acting as
//! electors. The result is a plan for the launcher: isolates to create and
//! isolates to extend.
//!
//! # Components
//!
//! - **`distributor`** — One election per component, deterministic order
//! - **`composer`** — Status store bookkeeping, crash recovery, redistribution
//! - **`electorate`** — The standard criteria built from configuration

pub mod composer;
pub mod distributor;
pub mod electorate;
pub mod error;

pub use composer::{Move, NodeComposer, Redistribution};
pub use distributor::{Distribution, Distributor};
pub use electorate::Electorate;
pub use error::{PlacementError, PlacementResult};

/// Audit record of one placement vote.
pub use conclave_vote::VoteRecord;
