//! Pairwise-compatibility criterion.
//!
//! Rates every pair of components that shared an isolate: crashes lower the
//! rating of each pair present in the lost isolate, stability ticks raise
//! it. A pair falling under the incompatibility threshold is never rewarded
//! again. Votes favour the candidates whose worst pair with the subject is
//! the best.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use conclave_core::{CompatibilityConfig, Component, EligibleIsolate, EventKind, LifecycleEvent};
use conclave_state::NodeStatusStore;
use conclave_vote::{Ballot, Elector, Verdict};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Criterion, clamp_rating};

/// Sorted pair of component names.
type Pair = (String, String);

fn pair(a: &str, b: &str) -> Pair {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Every unordered pair of distinct names, in lexicographic order.
fn pairs(names: &BTreeSet<String>) -> Vec<Pair> {
    let names: Vec<&String> = names.iter().collect();
    let mut out = Vec::new();
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            out.push(((*a).clone(), (*b).clone()));
        }
    }
    out
}

#[derive(Debug, Default)]
struct PairState {
    ratings: BTreeMap<Pair, f64>,
    last_crash: BTreeMap<Pair, u64>,
    incompatible: BTreeSet<Pair>,
}

/// Serializable form of the pair ratings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompatibilitySnapshot {
    pub ratings: Vec<(String, String, f64)>,
    pub last_crash: Vec<(String, String, u64)>,
    pub incompatible: Vec<(String, String)>,
}

pub struct CompatibilityCriterion {
    config: CompatibilityConfig,
    status: Arc<NodeStatusStore>,
    state: Mutex<PairState>,
}

impl CompatibilityCriterion {
    pub fn new(config: CompatibilityConfig, status: Arc<NodeStatusStore>) -> Self {
        Self {
            config,
            status,
            state: Mutex::new(PairState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PairState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rating of a pair, if it was ever updated.
    pub fn rating(&self, a: &str, b: &str) -> Option<f64> {
        self.lock().ratings.get(&pair(a, b)).copied()
    }

    pub fn is_incompatible(&self, a: &str, b: &str) -> bool {
        self.lock().incompatible.contains(&pair(a, b))
    }

    pub fn snapshot(&self) -> CompatibilitySnapshot {
        let state = self.lock();
        CompatibilitySnapshot {
            ratings: state
                .ratings
                .iter()
                .map(|((a, b), r)| (a.clone(), b.clone(), *r))
                .collect(),
            last_crash: state
                .last_crash
                .iter()
                .map(|((a, b), t)| (a.clone(), b.clone(), *t))
                .collect(),
            incompatible: state.incompatible.iter().cloned().collect(),
        }
    }

    pub fn restore(&self, snapshot: CompatibilitySnapshot) {
        let mut state = PairState::default();
        for (a, b, rating) in snapshot.ratings {
            state.ratings.insert(pair(&a, &b), clamp_rating(rating));
        }
        for (a, b, time) in snapshot.last_crash {
            state.last_crash.insert(pair(&a, &b), time);
        }
        for (a, b) in snapshot.incompatible {
            state.incompatible.insert(pair(&a, &b));
        }
        *self.lock() = state;
    }

    fn update_rating(&self, state: &mut PairState, key: Pair, delta: f64) {
        let current = state
            .ratings
            .get(&key)
            .copied()
            .unwrap_or(self.config.default_rating);
        let rating = clamp_rating(current + delta);
        if rating < self.config.incompatible_threshold && !state.incompatible.contains(&key) {
            info!(first = %key.0, second = %key.1, rating, "components are now incompatible");
            state.incompatible.insert(key.clone());
        }
        state.ratings.insert(key, rating);
    }

    fn on_crash(&self, components: &BTreeSet<String>, now: u64) {
        let mut state = self.lock();
        for key in pairs(components) {
            let last = state.last_crash.get(&key).copied().unwrap_or(0);
            let mut delta = if now.saturating_sub(last) < self.config.recent_window_secs {
                -self.config.recent_crash_penalty
            } else {
                -self.config.crash_penalty
            };
            if self.status.neighbours(&[key.0.as_str(), key.1.as_str()]) {
                delta *= self.config.crash_neighbour_factor;
            }
            state.last_crash.insert(key.clone(), now);
            self.update_rating(&mut state, key, delta);
        }
    }

    fn on_timer(&self, components: &BTreeSet<String>, now: u64) {
        let mut state = self.lock();
        for key in pairs(components) {
            if state.incompatible.contains(&key) {
                continue;
            }
            let last = state.last_crash.get(&key).copied().unwrap_or(0);
            let mut delta = if now.saturating_sub(last) > self.config.recent_window_secs {
                self.config.stable_bonus
            } else {
                self.config.recent_bonus
            };
            if self.status.neighbours(&[key.0.as_str(), key.1.as_str()]) {
                delta *= self.config.tick_neighbour_factor;
            }
            self.update_rating(&mut state, key, delta);
        }
    }
}

impl Elector<EligibleIsolate, Component> for CompatibilityCriterion {
    fn name(&self) -> &str {
        "compatibility"
    }

    fn vote(
        &self,
        candidates: &[EligibleIsolate],
        subject: &Component,
        ballot: &mut Ballot<EligibleIsolate>,
    ) -> Verdict<EligibleIsolate> {
        let state = self.lock();
        let mut neutral = None;
        let mut scores: Vec<(f64, &EligibleIsolate)> = Vec::new();

        for candidate in candidates {
            let members = candidate.component_names();
            if members.is_empty() {
                if candidate.name().is_none() {
                    neutral = Some(candidate);
                } else {
                    scores.push((self.config.empty_isolate_rating, candidate));
                }
                continue;
            }
            let worst = members
                .iter()
                .filter(|name| **name != subject.name)
                .map(|name| {
                    state
                        .ratings
                        .get(&pair(&subject.name, name))
                        .copied()
                        .unwrap_or(self.config.default_rating)
                })
                .reduce(f64::min);
            match worst {
                Some(worst) => scores.push((worst, candidate)),
                // Only the subject itself: the isolate it already runs in.
                None => scores.push((self.config.previous_isolate_rating, candidate)),
            }
        }

        scores.sort_by(|a, b| b.0.total_cmp(&a.0));
        for (score, candidate) in &scores {
            if *score >= self.config.accept_threshold {
                ballot.append_for((*candidate).clone());
            } else if *score < self.config.reject_threshold {
                ballot.append_against((*candidate).clone());
            }
        }
        if let Some(neutral) = neutral.filter(|_| ballot.votes_for().is_empty()) {
            ballot.append_for(neutral.clone());
        }
        debug!(component = %subject.name, scored = scores.len(), "compatibility criterion voted");
        ballot.lock();
        Verdict::Cast
    }
}

impl Criterion for CompatibilityCriterion {
    fn handle_event(&self, event: &LifecycleEvent) {
        let components = event.component_names();
        match event.kind {
            EventKind::IsolateLost => self.on_crash(&components, event.timestamp),
            EventKind::Timer => self.on_timer(&components, event.timestamp),
        }
    }

    fn reset(&self) {
        *self.lock() = PairState::default();
    }
}
