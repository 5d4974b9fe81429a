use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{RoundOutcome, VoteEngine, VoteParameters, rank};
use crate::Candidate;
use crate::ballot::Ballot;
use crate::record::RoundRecord;

/// Score of a vetoed candidate.
pub const VETO_SCORE: i64 = -1_000_000;

/// Approval voting with optional penalty and veto.
///
/// Each ballot approves its first `votes_per_elector` candidates (+1 each).
/// With a penalty, every vote against removes `penalty` points. With an
/// exclusion threshold, a candidate collecting more votes against than the
/// threshold is vetoed: its score is pinned to [`VETO_SCORE`] and it can't
/// be elected.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApprobationEngine;

impl<C: Candidate> VoteEngine<C> for ApprobationEngine {
    fn kind(&self) -> &'static str {
        "approbation"
    }

    fn analyze(
        &self,
        round: usize,
        ballots: &[Ballot<C>],
        candidates: &[C],
        parameters: &VoteParameters,
        default: Option<&C>,
        record: &mut RoundRecord,
    ) -> RoundOutcome<C> {
        let per_elector = parameters.votes_per_elector.max(1);
        let mut scores: HashMap<&C, i64> = HashMap::new();
        let mut approved: HashSet<&C> = HashSet::new();
        let mut against: HashMap<&C, usize> = HashMap::new();

        for ballot in ballots {
            for candidate in ballot
                .votes_for()
                .iter()
                .filter(|c| candidates.contains(c))
                .take(per_elector)
            {
                *scores.entry(candidate).or_default() += 1;
                approved.insert(candidate);
            }
            for candidate in ballot
                .votes_against()
                .iter()
                .filter(|c| candidates.contains(c))
            {
                *against.entry(candidate).or_default() += 1;
                let score = scores.entry(candidate).or_default();
                if let Some(penalty) = parameters.penalty {
                    *score -= penalty;
                }
            }
        }

        if scores.is_empty() {
            debug!(round, "no vote cast, electing default");
            return RoundOutcome::fallback(default);
        }

        let mut vetoed: HashSet<&C> = HashSet::new();
        if let Some(exclusion) = parameters.exclusion {
            for (candidate, count) in &against {
                if *count > exclusion {
                    vetoed.insert(*candidate);
                    scores.insert(*candidate, VETO_SCORE);
                }
            }
        }

        let ranked = rank(candidates, |c| scores.get(c).copied());
        record.set_results(&ranked);

        let elected: Vec<C> = ranked
            .iter()
            .filter(|(c, _)| approved.contains(c) && !vetoed.contains(c))
            .take(parameters.nb_elected.max(1))
            .map(|(c, _)| (*c).clone())
            .collect();

        if elected.is_empty() {
            debug!(round, vetoed = vetoed.len(), "every candidate rejected, electing default");
            return RoundOutcome::fallback(default);
        }
        RoundOutcome::Elected(elected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(elector: &str, votes_for: &[&'static str], against: &[&'static str]) -> Ballot<&'static str> {
        let mut ballot = Ballot::new(elector);
        ballot.set_for(votes_for.iter().copied());
        ballot.set_against(against.iter().copied());
        ballot.lock();
        ballot
    }

    fn run(
        ballots: &[Ballot<&'static str>],
        candidates: &[&'static str],
        parameters: &VoteParameters,
    ) -> (RoundOutcome<&'static str>, RoundRecord) {
        let mut record = RoundRecord::new(1, candidates);
        let outcome = ApprobationEngine.analyze(
            1,
            ballots,
            candidates,
            parameters,
            Some(&"default"),
            &mut record,
        );
        (outcome, record)
    }

    #[test]
    fn first_choices_elect_the_most_approved() {
        let ballots = [
            ballot("e1", &["A"], &[]),
            ballot("e2", &["A"], &[]),
            ballot("e3", &["B"], &[]),
        ];
        let (outcome, record) = run(&ballots, &["A", "B"], &VoteParameters::default());
        assert_eq!(outcome, RoundOutcome::Elected(vec!["A"]));
        assert_eq!(record.score_of("A"), Some(2));
        assert_eq!(record.score_of("B"), Some(1));
    }

    #[test]
    fn only_first_k_entries_count() {
        let ballots = [
            ballot("e1", &["A", "B"], &[]),
            ballot("e2", &["B", "C"], &[]),
        ];
        let (_, record) = run(&ballots, &["A", "B", "C"], &VoteParameters::default());
        assert_eq!(record.score_of("C"), None);

        let parameters = VoteParameters { votes_per_elector: 2, ..Default::default() };
        let (outcome, record) = run(&ballots, &["A", "B", "C"], &parameters);
        assert_eq!(outcome, RoundOutcome::Elected(vec!["B"]));
        assert_eq!(record.score_of("B"), Some(2));
    }

    #[test]
    fn ties_follow_candidate_order() {
        let ballots = [ballot("e1", &["B"], &[]), ballot("e2", &["A"], &[])];
        let (outcome, _) = run(&ballots, &["A", "B"], &VoteParameters::default());
        assert_eq!(outcome, RoundOutcome::Elected(vec!["A"]));
        let (outcome, _) = run(&ballots, &["B", "A"], &VoteParameters::default());
        assert_eq!(outcome, RoundOutcome::Elected(vec!["B"]));
    }

    #[test]
    fn penalty_lowers_score() {
        let ballots = [
            ballot("e1", &["A"], &[]),
            ballot("e2", &["A"], &[]),
            ballot("e3", &["B"], &["A"]),
        ];
        let parameters = VoteParameters { penalty: Some(5), ..Default::default() };
        let (outcome, record) = run(&ballots, &["A", "B"], &parameters);
        assert_eq!(outcome, RoundOutcome::Elected(vec!["B"]));
        assert_eq!(record.score_of("A"), Some(-3));
    }

    #[test]
    fn veto_is_applied_once() {
        let ballots = [
            ballot("e1", &["A"], &[]),
            ballot("e2", &["B"], &["A"]),
            ballot("e3", &[], &["A"]),
            ballot("e4", &[], &["A"]),
        ];
        let parameters = VoteParameters {
            penalty: Some(5),
            exclusion: Some(2),
            ..Default::default()
        };
        let (outcome, record) = run(&ballots, &["A", "B"], &parameters);
        assert_eq!(outcome, RoundOutcome::Elected(vec!["B"]));
        assert_eq!(record.score_of("A"), Some(VETO_SCORE));
    }

    #[test]
    fn exclusion_threshold_is_strict() {
        let ballots = [
            ballot("e1", &["A"], &[]),
            ballot("e2", &["A"], &[]),
            ballot("e3", &["A"], &[]),
            ballot("e4", &["B"], &["A"]),
            ballot("e5", &[], &["A"]),
        ];
        let parameters = VoteParameters { exclusion: Some(2), ..Default::default() };
        let (outcome, _) = run(&ballots, &["A", "B"], &parameters);
        assert_eq!(outcome, RoundOutcome::Elected(vec!["A"]));
    }

    #[test]
    fn rejected_only_candidates_fall_back_to_default() {
        let ballots = [ballot("e1", &[], &["A"])];
        let (outcome, _) = run(&ballots, &["A"], &VoteParameters::default());
        assert_eq!(outcome, RoundOutcome::Elected(vec!["default"]));
    }

    #[test]
    fn empty_ballots_elect_default() {
        let (outcome, _) = run(&[], &["A"], &VoteParameters::default());
        assert_eq!(outcome, RoundOutcome::Elected(vec!["default"]));
    }

    #[test]
    fn several_winners() {
        let ballots = [
            ballot("e1", &["A", "B"], &[]),
            ballot("e2", &["B", "C"], &[]),
        ];
        let parameters = VoteParameters {
            votes_per_elector: 2,
            nb_elected: 2,
            ..Default::default()
        };
        let (outcome, _) = run(&ballots, &["A", "B", "C"], &parameters);
        assert_eq!(outcome, RoundOutcome::Elected(vec!["B", "A"]));
    }
}
