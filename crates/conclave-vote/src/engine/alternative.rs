use std::collections::{HashMap, VecDeque};

use tracing::trace;

use super::{RoundOutcome, VoteEngine, VoteParameters};
use crate::Candidate;
use crate::ballot::Ballot;
use crate::record::RoundRecord;

/// Instant-runoff voting.
///
/// The "for" list of each ballot is a ranking. First choices are tallied; a
/// leader holding a majority of the live ballots wins. Otherwise the last
/// candidate is eliminated and each of its ballots, in the order they were
/// received, moves on to its next surviving preference. Ballots with no
/// preference left are exhausted.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlternativeEngine;

impl<C: Candidate> VoteEngine<C> for AlternativeEngine {
    fn kind(&self) -> &'static str {
        "alternative"
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
        let preferences: Vec<Vec<&C>> = ballots
            .iter()
            .map(|b| {
                b.votes_for()
                    .iter()
                    .filter(|c| candidates.contains(c))
                    .collect()
            })
            .collect();

        // Ballot indices held by each candidate, in arrival order.
        let mut piles: HashMap<&C, VecDeque<usize>> =
            candidates.iter().map(|c| (c, VecDeque::new())).collect();
        // Position of each ballot in its own ranking.
        let mut cursor = vec![0usize; preferences.len()];
        for (idx, ranking) in preferences.iter().enumerate() {
            if let Some(pile) = ranking.first().and_then(|first| piles.get_mut(first)) {
                pile.push_back(idx);
            }
        }

        let mut alive: Vec<&C> = candidates.iter().collect();
        let mut pass = 1;
        loop {
            let counts: Vec<(&C, i64)> = alive
                .iter()
                .map(|c| (*c, piles.get(c).map_or(0, |p| p.len() as i64)))
                .collect();
            record.add_extra(format!("Pass {pass}"), &counts);

            let live: i64 = counts.iter().map(|(_, n)| n).sum();
            if live == 0 {
                trace!(round, pass, "no live ballot, electing default");
                return RoundOutcome::fallback(default);
            }

            let mut ranked = counts.clone();
            ranked.sort_by(|a, b| b.1.cmp(&a.1));
            let majority = live / 2 + 1;
            let (leader, leader_votes) = ranked[0];
            let tied_below_majority = ranked
                .get(1)
                .is_some_and(|(_, second)| leader_votes == majority - 1 && *second == majority - 1);

            if ranked.len() == 1 || leader_votes >= majority || tied_below_majority {
                record.set_results(&counts);
                trace!(round, pass, %leader, votes = leader_votes, "runoff decided");
                return RoundOutcome::Elected(vec![leader.clone()]);
            }

            // Lowest tally; on a tie the candidate listed last goes first.
            let (loser, _) = ranked[ranked.len() - 1];
            alive.retain(|c| *c != loser);
            let transferred = piles.remove(loser).unwrap_or_default();
            trace!(round, pass, %loser, transferred = transferred.len(), "candidate eliminated");

            for idx in transferred {
                let ranking = &preferences[idx];
                while cursor[idx] < ranking.len() {
                    cursor[idx] += 1;
                    if let Some(pile) = ranking.get(cursor[idx]).and_then(|next| piles.get_mut(next)) {
                        pile.push_back(idx);
                        break;
                    }
                }
            }
            pass += 1;
        }
    }
}
