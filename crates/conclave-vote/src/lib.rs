//! conclave-vote — a pluggable, multi-round voting system.
//!
//! Electors fill one [`Ballot`] each per round; an engine turns the ballots
//! into a result or asks for a run-off among fewer candidates. The
//! [`VoteCore`] drives the rounds, honours forced results and keeps an audit
//! trail of every vote.
//!
//! # Engines
//!
//! - **`approbation`** — each elector approves its first candidates; votes
//!   against cost a penalty and too many of them veto the candidate
//! - **`alternative`** — instant-runoff over ranked preferences
//! - **`majority`** — absolute majority of electors, run-off otherwise
//!
//! The crate is generic over the candidate type: anything clonable,
//! hashable and displayable can run for election.

pub mod ballot;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod record;

use std::fmt;
use std::hash::Hash;

pub use ballot::{Ballot, Elector, Verdict};
pub use orchestrator::VoteCore;
pub use engine::{
    AlternativeEngine, ApprobationEngine, MajorityEngine, RoundOutcome, VoteEngine,
    VoteParameters,
};
pub use error::{VoteError, VoteResult};
pub use record::{BallotRecord, Extra, RoundRecord, Tally, VoteRecord};

/// Anything that can run for election.
pub trait Candidate: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync {}

impl<T> Candidate for T where T: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync {}
