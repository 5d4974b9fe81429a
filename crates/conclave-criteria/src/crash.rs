//! Crash-reliability criterion.
//!
//! Each component has a rating in [0, 100]. Crashes lower it, quiet periods
//! raise it. Components with similar ratings are grouped together so that a
//! flaky component does not take stable ones down with it. A component
//! whose rating falls under the instability threshold is marked unstable for
//! good and is kept alone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use conclave_core::{Component, CrashConfig, EligibleIsolate, EventKind, LifecycleEvent};
use conclave_vote::{Ballot, Elector, Verdict};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Criterion, clamp_rating};

/// Everything the crash criterion has learnt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrashSnapshot {
    pub ratings: BTreeMap<String, f64>,
    /// Component name -> timestamp of its last crash.
    pub last_crash: BTreeMap<String, u64>,
    pub unstable: BTreeSet<String>,
}

pub struct CrashCriterion {
    config: CrashConfig,
    state: Mutex<CrashSnapshot>,
}

impl CrashCriterion {
    pub fn new(config: CrashConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CrashSnapshot::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CrashSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rating(&self, component: &str) -> Option<f64> {
        self.lock().ratings.get(component).copied()
    }

    pub fn is_unstable(&self, component: &str) -> bool {
        self.lock().unstable.contains(component)
    }

    pub fn snapshot(&self) -> CrashSnapshot {
        self.lock().clone()
    }

    /// Replace the learnt state. Ratings are clamped on the way in.
    pub fn restore(&self, mut snapshot: CrashSnapshot) {
        for rating in snapshot.ratings.values_mut() {
            *rating = clamp_rating(*rating);
        }
        *self.lock() = snapshot;
    }

    fn update_rating(&self, state: &mut CrashSnapshot, component: &str, delta: f64) {
        let current = state
            .ratings
            .get(component)
            .copied()
            .unwrap_or(self.config.default_rating);
        let rating = clamp_rating(current + delta);
        state.ratings.insert(component.to_string(), rating);
        if rating < self.config.unstable_threshold && state.unstable.insert(component.to_string()) {
            info!(component, rating, "component is now unstable");
        }
    }

    fn on_crash(&self, components: &BTreeSet<String>, now: u64) {
        let mut state = self.lock();
        for name in components {
            if !state.unstable.contains(name) {
                let last = state.last_crash.get(name).copied().unwrap_or(0);
                let delta = if now.saturating_sub(last) < self.config.recent_window_secs {
                    -self.config.recent_crash_penalty
                } else {
                    -self.config.crash_penalty
                };
                self.update_rating(&mut state, name, delta);
            }
            state.last_crash.insert(name.clone(), now);
        }
    }

    fn on_timer(&self, components: &BTreeSet<String>, now: u64) {
        let mut state = self.lock();
        for name in components {
            if state.unstable.contains(name) {
                continue;
            }
            let last = state.last_crash.get(name).copied().unwrap_or(0);
            let quiet = now.saturating_sub(last);
            if quiet > self.config.long_stability_secs {
                self.update_rating(&mut state, name, self.config.long_stability_bonus);
            } else if quiet > self.config.recent_window_secs {
                self.update_rating(&mut state, name, self.config.stability_bonus);
            }
        }
    }
}

impl Elector<EligibleIsolate, Component> for CrashCriterion {
    fn name(&self) -> &str {
        "crash"
    }

    fn vote(
        &self,
        candidates: &[EligibleIsolate],
        subject: &Component,
        ballot: &mut Ballot<EligibleIsolate>,
    ) -> Verdict<EligibleIsolate> {
        let mut state = self.lock();
        let rating = *state
            .ratings
            .entry(subject.name.clone())
            .or_insert(self.config.default_rating);
        let unstable = state.unstable.contains(&subject.name);

        let mut distances: Vec<(f64, &EligibleIsolate)> = Vec::new();
        for candidate in candidates {
            let members = candidate.component_names();
            if members.is_empty() {
                let distance = if candidate.name().is_none() {
                    self.config.neutral_distance
                } else {
                    self.config.named_empty_distance
                };
                distances.push((distance, candidate));
            } else if members.len() == 1 && members.contains(&subject.name) {
                distances.push((0.0, candidate));
            } else if unstable {
                ballot.append_against(candidate.clone());
            } else if rating > self.config.min_shared_rating {
                let total: f64 = members
                    .iter()
                    .map(|name| {
                        *state
                            .ratings
                            .entry(name.clone())
                            .or_insert(self.config.occupant_default_rating)
                    })
                    .sum();
                let distance = (total / members.len() as f64 - rating).abs();
                if distance < self.config.max_distance {
                    distances.push((distance, candidate));
                }
            }
        }

        distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        debug!(component = %subject.name, rating, accepted = distances.len(), "crash criterion voted");
        ballot.set_for(distances.into_iter().map(|(_, c)| c.clone()));
        ballot.lock();
        Verdict::Cast
    }
}

impl Criterion for CrashCriterion {
    fn handle_event(&self, event: &LifecycleEvent) {
        let components = event.component_names();
        match event.kind {
            EventKind::IsolateLost => self.on_crash(&components, event.timestamp),
            EventKind::Timer => self.on_timer(&components, event.timestamp),
        }
    }

    fn reset(&self) {
        *self.lock() = CrashSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::Isolate;
    use proptest::prelude::*;

    fn comp(name: &str) -> Component {
        Component::new(name, format!("{name}-factory"))
            .unwrap()
            .with_language("python")
    }

    fn crash(names: &[&str], at: u64) -> LifecycleEvent {
        LifecycleEvent::isolate_lost(Some("iso"), names.iter().map(|n| comp(n))).at(at)
    }

    fn tick(names: &[&str], at: u64) -> LifecycleEvent {
        LifecycleEvent::timer(Some("iso"), names.iter().map(|n| comp(n))).at(at)
    }

    fn criterion() -> CrashCriterion {
        CrashCriterion::new(CrashConfig::default())
    }

    #[test]
    fn crash_penalties_depend_on_recency() {
        let crit = criterion();
        crit.handle_event(&crash(&["a"], 1_000));
        assert_eq!(crit.rating("a"), Some(45.0));

        crit.handle_event(&crash(&["a"], 1_030));
        assert_eq!(crit.rating("a"), Some(35.0));

        crit.handle_event(&crash(&["a"], 1_200));
        assert_eq!(crit.rating("a"), Some(30.0));
    }

    #[test]
    fn ticks_reward_quiet_periods() {
        let crit = criterion();
        crit.handle_event(&crash(&["a"], 1_000));

        // Grace window: nothing.
        crit.handle_event(&tick(&["a"], 1_050));
        assert_eq!(crit.rating("a"), Some(45.0));

        crit.handle_event(&tick(&["a"], 1_090));
        assert_eq!(crit.rating("a"), Some(49.0));

        crit.handle_event(&tick(&["a"], 1_200));
        assert_eq!(crit.rating("a"), Some(57.0));
    }

    #[test]
    fn unstable_component_is_frozen() {
        let crit = criterion();
        for i in 0..10 {
            crit.handle_event(&crash(&["a"], 1_000 + i));
        }
        assert!(crit.is_unstable("a"));
        let frozen = crit.rating("a");
        crit.handle_event(&tick(&["a"], 10_000));
        crit.handle_event(&crash(&["a"], 10_001));
        assert_eq!(crit.rating("a"), frozen);
    }

    #[test]
    fn vote_prefers_own_isolate_then_neutral() {
        let crit = criterion();
        let own = EligibleIsolate::new(1, None, Some("python"), vec![comp("a")]);
        let neutral = EligibleIsolate::neutral(2);
        let named_empty = EligibleIsolate::new(3, Some("spare"), None, Vec::new());

        let mut ballot = Ballot::new("crash");
        crit.vote(&[neutral.clone(), named_empty.clone(), own.clone()], &comp("a"), &mut ballot);
        assert_eq!(ballot.votes_for(), &[own, named_empty, neutral]);
        assert!(ballot.is_locked());
    }

    #[test]
    fn vote_groups_similar_ratings() {
        let crit = criterion();
        // "flaky" drops to 35, "solid" stays unknown (occupant default 90).
        crit.handle_event(&crash(&["flaky"], 1_000));
        crit.handle_event(&crash(&["flaky"], 1_010));
        let with_flaky = EligibleIsolate::new(1, Some("i1"), Some("python"), vec![comp("flaky")]);
        let with_solid = EligibleIsolate::new(2, Some("i2"), Some("python"), vec![comp("solid")]);

        let mut ballot = Ballot::new("crash");
        crit.vote(&[with_solid, with_flaky.clone()], &comp("new"), &mut ballot);
        // new = 50: |35 - 50| = 15 accepted, |90 - 50| = 40 rejected.
        assert_eq!(ballot.votes_for(), &[with_flaky]);
        assert_eq!(crit.rating("solid"), Some(90.0));
    }

    #[test]
    fn unstable_subject_votes_against_occupied_isolates() {
        let crit = criterion();
        for i in 0..10 {
            crit.handle_event(&crash(&["a"], 1_000 + i));
        }
        let occupied = EligibleIsolate::wrap(1, &Isolate::new("i1", Some("python"), vec![comp("b")]));
        let neutral = EligibleIsolate::neutral(2);

        let mut ballot = Ballot::new("crash");
        crit.vote(&[occupied.clone(), neutral.clone()], &comp("a"), &mut ballot);
        assert_eq!(ballot.votes_against(), &[occupied]);
        assert_eq!(ballot.votes_for(), &[neutral]);
    }

    #[test]
    fn snapshot_restore_and_reset() {
        let crit = criterion();
        crit.handle_event(&crash(&["a"], 1_000));
        let snapshot = crit.snapshot();

        let other = criterion();
        other.restore(snapshot.clone());
        assert_eq!(other.rating("a"), Some(45.0));

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: CrashSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);

        other.reset();
        assert_eq!(other.rating("a"), None);
    }

    proptest! {
        #[test]
        fn ratings_stay_in_bounds(events in proptest::collection::vec((any::<bool>(), 0u64..400), 0..200)) {
            let crit = criterion();
            let mut now = 1_000u64;
            for (is_crash, step) in events {
                now += step;
                let event = if is_crash { crash(&["a", "b"], now) } else { tick(&["a", "b"], now) };
                crit.handle_event(&event);
                for name in ["a", "b"] {
                    if let Some(rating) = crit.rating(name) {
                        prop_assert!((0.0..=100.0).contains(&rating));
                    }
                }
            }
        }
    }
}
