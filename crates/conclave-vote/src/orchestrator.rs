//! Vote orchestrator — drives one election from electors to a result.
//!
//! # Architecture
//!
//! ```text
//!   electors ──vote()──▶ ballots ──▶ engine.analyze()
//!                                     │
//!                ┌────────────────────┼──────────────────┐
//!                ▼                    ▼                  ▼
//!            Elected             NextRound(cands)    (coup d'état)
//!                │                    │                  │
//!                │          round += 1, re-vote          │
//!                ▼                                       ▼
//!           VoteRecord ───────────────▶ history (bounded ring)
//! ```
//!
//! A round never blocks: the loop is bounded by `max_rounds`, after which the
//! caller-supplied default candidate is returned.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::Candidate;
use crate::ballot::{Ballot, Elector, Verdict};
use crate::engine::{
    AlternativeEngine, ApprobationEngine, MajorityEngine, RoundOutcome, VoteEngine,
    VoteParameters,
};
use crate::error::{VoteError, VoteResult};
use crate::record::{RoundRecord, VoteRecord};

/// Default number of vote records kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 128;

/// Runs votes and keeps their audit trail.
pub struct VoteCore<C: Candidate> {
    engines: HashMap<&'static str, Arc<dyn VoteEngine<C>>>,
    history: Mutex<VecDeque<VoteRecord>>,
    capacity: usize,
}

impl<C: Candidate + 'static> VoteCore<C> {
    /// A vote core with the built-in engines registered.
    pub fn new(capacity: usize) -> Self {
        let mut core = Self {
            engines: HashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        };
        core.register(ApprobationEngine);
        core.register(AlternativeEngine);
        core.register(MajorityEngine);
        core
    }
}

impl<C: Candidate + 'static> Default for VoteCore<C> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl<C: Candidate> VoteCore<C> {
    /// Add or replace an engine, keyed by its kind.
    pub fn register(&mut self, engine: impl VoteEngine<C> + 'static) {
        self.engines.insert(engine.kind(), Arc::new(engine));
    }

    /// Registered engine kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.engines.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    fn history_lock(&self) -> MutexGuard<'_, VecDeque<VoteRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Past votes, oldest first.
    pub fn history(&self) -> Vec<VoteRecord> {
        self.history_lock().iter().cloned().collect()
    }

    /// The most recent vote.
    pub fn last(&self) -> Option<VoteRecord> {
        self.history_lock().back().cloned()
    }

    pub fn clear_history(&self) {
        self.history_lock().clear();
    }

    fn archive(&self, record: VoteRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut history = self.history_lock();
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Elect a single candidate. Returns `default` when the vote can't
    /// decide.
    #[allow(clippy::too_many_arguments)]
    pub fn vote<S, E>(
        &self,
        electors: &[Arc<E>],
        candidates: &[C],
        subject: &S,
        name: &str,
        kind: &str,
        parameters: &VoteParameters,
        default: Option<C>,
    ) -> VoteResult<Option<C>>
    where
        S: fmt::Display + ?Sized,
        E: Elector<C, S> + ?Sized,
    {
        let elected = self.elect(electors, candidates, subject, name, kind, parameters, default)?;
        Ok(elected.into_iter().next())
    }

    /// Run a vote and return every elected candidate, best first.
    #[allow(clippy::too_many_arguments)]
    pub fn elect<S, E>(
        &self,
        electors: &[Arc<E>],
        candidates: &[C],
        subject: &S,
        name: &str,
        kind: &str,
        parameters: &VoteParameters,
        default: Option<C>,
    ) -> VoteResult<Vec<C>>
    where
        S: fmt::Display + ?Sized,
        E: Elector<C, S> + ?Sized,
    {
        let engine = self
            .engines
            .get(kind)
            .cloned()
            .ok_or_else(|| VoteError::UnknownEngine(kind.to_string()))?;

        let mut record = VoteRecord::new(
            name,
            kind,
            subject.to_string(),
            candidates,
            electors.iter().map(|e| e.name().to_string()).collect(),
            parameters.clone(),
        );
        let fallback: Vec<C> = default.iter().cloned().collect();

        if candidates.is_empty() {
            warn!(vote = name, %subject, "no candidate, electing default");
            record.results = labels(&fallback);
            self.archive(record);
            return Ok(fallback);
        }

        let max_rounds = parameters.max_rounds.max(1);
        let mut round = 1;
        let mut round_candidates = candidates.to_vec();

        let elected = loop {
            let mut round_record = RoundRecord::new(round, &round_candidates);
            let mut ballots = Vec::with_capacity(electors.len());
            let mut claimant = None;

            for elector in electors {
                let mut ballot = if parameters.secret_ballots {
                    Ballot::secret()
                } else {
                    Ballot::new(elector.name())
                };
                let verdict = elector.vote(&round_candidates, subject, &mut ballot);
                if !ballot.is_locked() {
                    warn!(vote = name, elector = elector.name(), "ballot left unlocked");
                    ballot.lock();
                }
                ballots.push(ballot);
                if let Verdict::CoupDEtat(forced) = verdict {
                    info!(vote = name, elector = elector.name(), %forced, "coup d'état");
                    claimant = Some(forced);
                    break;
                }
            }
            round_record.set_ballots(&ballots);

            if let Some(forced) = claimant {
                record.rounds.push(round_record);
                record.coup_d_etat = true;
                break vec![forced];
            }

            let outcome = engine.analyze(
                round,
                &ballots,
                &round_candidates,
                parameters,
                default.as_ref(),
                &mut round_record,
            );
            record.rounds.push(round_record);

            match outcome {
                RoundOutcome::Elected(winners) if winners.is_empty() => break fallback.clone(),
                RoundOutcome::Elected(winners) => break winners,
                RoundOutcome::NextRound(next) if next.len() <= 1 => {
                    break if next.is_empty() { fallback.clone() } else { next };
                }
                RoundOutcome::NextRound(next) => {
                    if round >= max_rounds {
                        warn!(vote = name, rounds = round, "no decision after maximum rounds, electing default");
                        break fallback.clone();
                    }
                    debug!(vote = name, round, candidates = next.len(), "next round");
                    round += 1;
                    round_candidates = next;
                }
            }
        };

        record.results = labels(&elected);
        debug!(
            vote = name,
            %subject,
            rounds = record.rounds.len(),
            winner = record.winner().unwrap_or("<none>"),
            "vote finished"
        );
        self.archive(record);
        Ok(elected)
    }
}

fn labels<C: fmt::Display>(candidates: &[C]) -> Vec<String> {
    candidates.iter().map(ToString::to_string).collect()
}
