//! Election engines.
//!
//! An engine analyses the ballots of one round. It either elects candidates
//! or asks for another round among a narrower candidate list. Ties are
//! always broken by the order of the candidate list handed to the engine.

mod alternative;
mod approbation;
mod majority;

pub use alternative::AlternativeEngine;
pub use approbation::ApprobationEngine;
pub use majority::MajorityEngine;

use serde::{Deserialize, Serialize};

use crate::Candidate;
use crate::ballot::Ballot;
use crate::record::RoundRecord;

/// Result of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome<C> {
    /// Winners, best first. Empty when nobody could be elected.
    Elected(Vec<C>),
    /// Run another round among these candidates.
    NextRound(Vec<C>),
}

impl<C: Clone> RoundOutcome<C> {
    /// Elect the default candidate, or nobody.
    pub fn fallback(default: Option<&C>) -> Self {
        RoundOutcome::Elected(default.into_iter().cloned().collect())
    }
}

/// Parameters of a vote, shared by all engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteParameters {
    /// Number of "for" entries counted per ballot.
    pub votes_per_elector: usize,
    /// Number of candidates to elect.
    pub nb_elected: usize,
    /// Score removed for each vote against a candidate.
    pub penalty: Option<i64>,
    /// More votes against than this vetoes the candidate.
    pub exclusion: Option<usize>,
    pub max_rounds: usize,
    /// Hide elector names in the vote record.
    pub secret_ballots: bool,
}

impl Default for VoteParameters {
    fn default() -> Self {
        Self {
            votes_per_elector: 1,
            nb_elected: 1,
            penalty: None,
            exclusion: None,
            max_rounds: 3,
            secret_ballots: false,
        }
    }
}

/// A pluggable counting method.
pub trait VoteEngine<C: Candidate>: Send + Sync {
    /// Registry name of the engine.
    fn kind(&self) -> &'static str;

    /// Count one round. `default` is returned when there is nothing to
    /// count.
    fn analyze(
        &self,
        round: usize,
        ballots: &[Ballot<C>],
        candidates: &[C],
        parameters: &VoteParameters,
        default: Option<&C>,
        record: &mut RoundRecord,
    ) -> RoundOutcome<C>;
}

/// Order `candidates` by descending score, keeping the candidate order for
/// equal scores. Candidates without a score are left out.
pub(crate) fn rank<'a, C: Candidate>(
    candidates: &'a [C],
    score: impl Fn(&C) -> Option<i64>,
) -> Vec<(&'a C, i64)> {
    let mut ranked: Vec<(&C, i64)> = candidates
        .iter()
        .filter_map(|c| score(c).map(|s| (c, s)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}
