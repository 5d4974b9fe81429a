//! History (anti-affinity) criterion.
//!
//! Remembers the sets of components that were running together when their
//! isolate crashed, and refuses to rebuild any isolate containing one of
//! those sets. Otherwise it gathers components: the more occupants a
//! candidate has, the better.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use conclave_core::{Component, EligibleIsolate, EventKind, LifecycleEvent};
use conclave_vote::{Ballot, Elector, Verdict};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Criterion;

/// Recorded crash combinations, each sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub crashes: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct HistoryCriterion {
    crashes: Mutex<BTreeSet<BTreeSet<String>>>,
}

impl HistoryCriterion {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<BTreeSet<String>>> {
        self.crashes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorded crash combinations, sorted.
    pub fn crashes(&self) -> Vec<Vec<String>> {
        self.lock()
            .iter()
            .map(|crash| crash.iter().cloned().collect())
            .collect()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            crashes: self.crashes(),
        }
    }

    /// Replace the history. Entries of fewer than two components are
    /// dropped.
    pub fn restore(&self, snapshot: HistorySnapshot) {
        *self.lock() = snapshot
            .crashes
            .into_iter()
            .map(|crash| crash.into_iter().collect::<BTreeSet<String>>())
            .filter(|crash| crash.len() > 1)
            .collect();
    }

    fn on_crash(&self, components: BTreeSet<String>) {
        // A lone component must stay allowed to run alone.
        if components.len() < 2 {
            return;
        }
        let mut crashes = self.lock();
        crashes.retain(|old| !old.is_subset(&components));
        crashes.insert(components);
        info!(
            crashes = crashes.len(),
            history = ?crashes.iter().map(|c| c.iter().cloned().collect::<Vec<_>>().join(", ")).collect::<Vec<_>>(),
            "crash history updated"
        );
    }
}

impl Elector<EligibleIsolate, Component> for HistoryCriterion {
    fn name(&self) -> &str {
        "history"
    }

    fn vote(
        &self,
        candidates: &[EligibleIsolate],
        subject: &Component,
        ballot: &mut Ballot<EligibleIsolate>,
    ) -> Verdict<EligibleIsolate> {
        let crashes = self.lock();
        let mut neutral = None;
        // (other occupants, sort name, candidate)
        let mut contents: Vec<(BTreeSet<String>, String, &EligibleIsolate)> = Vec::new();
        for candidate in candidates {
            let mut members = candidate.component_names();
            let name = candidate.name();
            if members.is_empty() && name.is_none() {
                neutral = Some(candidate);
                continue;
            }
            members.remove(&subject.name);
            contents.push((members, name.unwrap_or_default(), candidate));
        }
        contents.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.1.cmp(&b.1)));

        let mut preference: Vec<(usize, &EligibleIsolate)> = Vec::new();
        for (members, _, candidate) in contents {
            if members.is_empty() {
                preference.push((0, candidate));
                continue;
            }
            let mut future = members;
            future.insert(subject.name.clone());
            match crashes.iter().find(|crash| crash.is_subset(&future)) {
                Some(crash) => {
                    debug!(component = %subject.name, candidate = %candidate, ?crash, "known bad combination");
                    ballot.append_against(candidate.clone());
                }
                None => preference.push((future.len() - 1, candidate)),
            }
        }

        preference.sort_by(|a, b| b.0.cmp(&a.0));
        if preference.is_empty() {
            if let Some(neutral) = neutral {
                debug!(component = %subject.name, "falling back to the neutral candidate");
                ballot.append_for(neutral.clone());
            }
        } else {
            for (_, candidate) in preference {
                ballot.append_for(candidate.clone());
            }
        }
        ballot.lock();
        Verdict::Cast
    }
}

impl Criterion for HistoryCriterion {
    fn handle_event(&self, event: &LifecycleEvent) {
        if event.kind == EventKind::IsolateLost {
            self.on_crash(event.component_names());
        }
    }

    fn reset(&self) {
        self.lock().clear();
    }
}
