use std::collections::HashMap;

use tracing::debug;

use super::{RoundOutcome, VoteEngine, VoteParameters, rank};
use crate::Candidate;
use crate::ballot::Ballot;
use crate::record::RoundRecord;

/// Absolute majority over the first choice of each ballot.
///
/// Without a majority, another round is requested among the candidates
/// that gathered at least a tenth of the electors (plus one).
#[derive(Debug, Default, Clone, Copy)]
pub struct MajorityEngine;

impl<C: Candidate> VoteEngine<C> for MajorityEngine {
    fn kind(&self) -> &'static str {
        "majority"
    }

    fn analyze(
        &self,
        round: usize,
        ballots: &[Ballot<C>],
        candidates: &[C],
        _parameters: &VoteParameters,
        default: Option<&C>,
        record: &mut RoundRecord,
    ) -> RoundOutcome<C> {
        let mut counts: HashMap<&C, i64> = HashMap::new();
        for ballot in ballots {
            if let Some(first) = ballot.votes_for().iter().find(|c| candidates.contains(c)) {
                *counts.entry(first).or_default() += 1;
            }
        }

        let ranked = rank(candidates, |c| counts.get(c).copied());
        record.set_results(&ranked);

        match ranked.as_slice() {
            [] => RoundOutcome::fallback(default),
            [(only, _)] => RoundOutcome::Elected(vec![(*only).clone()]),
            [(leader, votes), ..] => {
                let voters = ballots.len() as i64;
                if *votes >= voters / 2 + 1 {
                    return RoundOutcome::Elected(vec![(*leader).clone()]);
                }
                let threshold = voters / 10 + 1;
                let retained: Vec<C> = ranked
                    .iter()
                    .filter(|(_, n)| *n >= threshold)
                    .map(|(c, _)| (*c).clone())
                    .collect();
                debug!(round, retained = retained.len(), "no majority, run-off requested");
                RoundOutcome::NextRound(retained)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(elector: &str, choice: &'static str) -> Ballot<&'static str> {
        let mut ballot = Ballot::new(elector);
        ballot.append_for(choice);
        ballot.lock();
        ballot
    }

    fn run(ballots: &[Ballot<&'static str>], candidates: &[&'static str]) -> RoundOutcome<&'static str> {
        let mut record = RoundRecord::new(1, candidates);
        MajorityEngine.analyze(
            1,
            ballots,
            candidates,
            &VoteParameters::default(),
            None,
            &mut record,
        )
    }

    #[test]
    fn majority_wins() {
        let ballots = [first("e1", "A"), first("e2", "A"), first("e3", "B")];
        assert_eq!(run(&ballots, &["A", "B"]), RoundOutcome::Elected(vec!["A"]));
    }

    #[test]
    fn split_vote_requests_runoff() {
        let ballots = [
            first("e1", "A"),
            first("e2", "B"),
            first("e3", "C"),
            first("e4", "A"),
        ];
        assert_eq!(
            run(&ballots, &["A", "B", "C"]),
            RoundOutcome::NextRound(vec!["A", "B", "C"])
        );
    }

    #[test]
    fn weak_candidates_are_dropped_from_runoff() {
        // 10 electors: majority 6, threshold 2.
        let mut ballots = Vec::new();
        for i in 0..4 {
            ballots.push(first(&format!("a{i}"), "A"));
        }
        for i in 0..4 {
            ballots.push(first(&format!("b{i}"), "B"));
        }
        ballots.push(first("c", "C"));
        ballots.push(first("d", "D"));
        assert_eq!(
            run(&ballots, &["A", "B", "C", "D"]),
            RoundOutcome::NextRound(vec!["A", "B"])
        );
    }

    #[test]
    fn single_voted_candidate_is_elected() {
        let ballots = [first("e1", "B"), Ballot::new("e2")];
        assert_eq!(run(&ballots, &["A", "B"]), RoundOutcome::Elected(vec!["B"]));
    }

    #[test]
    fn nothing_voted_elects_nobody_without_default() {
        assert_eq!(run(&[], &["A"]), RoundOutcome::Elected(vec![]));
    }
}
