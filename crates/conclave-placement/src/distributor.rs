//! Distributor — places components into isolates, one election each.
//!
//! Components are processed sorted by name. For each one:
//! 1. the growing candidate list is filtered by language;
//! 2. a fresh neutral candidate is appended, the component is shown only
//!    to the matching candidates;
//! 3. every criterion votes, the orchestrator elects one candidate (the
//!    neutral one when the vote can't decide);
//! 4. the winner receives the component, the losers drop their pending
//!    rename and hide the component again.
//!
//! Nothing outside the candidates is touched: committing the result to the
//! node status store is the caller's job, once the whole pass is done.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use conclave_core::{
    Component, EligibleIsolate, Isolate, LifecycleEvent, PlacementConfig, languages_compatible,
};
use conclave_criteria::Criterion;
use conclave_vote::{VoteCore, VoteError, VoteParameters, VoteRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PlacementResult;

/// Outcome of one distribution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    /// Existing isolates that gained components, with their full content.
    pub updated: Vec<Isolate>,
    /// Isolates created by this pass, in creation order.
    pub new: Vec<Isolate>,
    /// Final layout of every non-empty candidate, sorted by name.
    pub layout: Vec<Isolate>,
}

impl Distribution {
    /// Isolates the launcher has to act on: new ones, then updated ones.
    pub fn changed(&self) -> impl Iterator<Item = &Isolate> {
        self.new.iter().chain(self.updated.iter())
    }

    /// Component name -> isolate name, over the whole layout.
    pub fn placements(&self) -> BTreeMap<String, String> {
        self.layout
            .iter()
            .flat_map(|isolate| {
                isolate
                    .components
                    .iter()
                    .map(move |c| (c.name.clone(), isolate.name.clone()))
            })
            .collect()
    }
}

/// Clusters components into isolates by vote.
pub struct Distributor {
    electors: Vec<Arc<dyn Criterion>>,
    votes: VoteCore<EligibleIsolate>,
    config: PlacementConfig,
    /// Candidate identities, unique for the lifetime of the distributor.
    next_candidate: AtomicU64,
    /// Suffix of generated isolate names.
    next_isolate: AtomicU64,
    passes: AtomicU64,
}

impl Distributor {
    /// Fails if the configured vote kind has no engine.
    pub fn new(electors: Vec<Arc<dyn Criterion>>, config: PlacementConfig) -> PlacementResult<Self> {
        let votes = VoteCore::new(config.history_capacity);
        if !votes.kinds().contains(&config.vote_kind.as_str()) {
            return Err(VoteError::UnknownEngine(config.vote_kind.clone()).into());
        }
        Ok(Self {
            electors,
            votes,
            config,
            next_candidate: AtomicU64::new(1),
            next_isolate: AtomicU64::new(1),
            passes: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Names of the electors, in voting order.
    pub fn electors(&self) -> Vec<String> {
        self.electors.iter().map(|e| e.name().to_string()).collect()
    }

    /// Audit trail of the past votes, oldest first.
    pub fn history(&self) -> Vec<VoteRecord> {
        self.votes.history()
    }

    pub fn last_vote(&self) -> Option<VoteRecord> {
        self.votes.last()
    }

    fn candidate_id(&self) -> u64 {
        self.next_candidate.fetch_add(1, Ordering::Relaxed)
    }

    fn parameters(&self) -> VoteParameters {
        VoteParameters {
            votes_per_elector: self.config.votes_per_elector,
            nb_elected: 1,
            penalty: Some(self.config.penalty),
            exclusion: Some(self.config.exclusion),
            max_rounds: self.config.max_rounds,
            secret_ballots: false,
        }
    }

    /// Place `components`, starting from the isolates already running.
    ///
    /// Components of `running` that are also listed in `components` are
    /// placed again: they may stay where they are or move.
    pub fn distribute(
        &self,
        components: &[Component],
        running: &[Isolate],
    ) -> PlacementResult<Distribution> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let parameters = self.parameters();

        let mut sorted: Vec<&Component> = components.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        sorted.dedup_by(|a, b| a.name == b.name);

        let mut candidates: Vec<EligibleIsolate> = running
            .iter()
            .map(|isolate| EligibleIsolate::wrap(self.candidate_id(), isolate))
            .collect();
        for candidate in &candidates {
            candidate.hide(sorted.iter().map(|c| c.name.as_str()));
        }

        let mut new: Vec<EligibleIsolate> = Vec::new();
        let mut updated: Vec<EligibleIsolate> = Vec::new();

        for component in sorted {
            let mut matching: Vec<EligibleIsolate> = candidates
                .iter()
                .filter(|c| languages_compatible(c.language().as_deref(), component.language.as_deref()))
                .cloned()
                .collect();
            matching.sort_by_key(|c| c.name().unwrap_or_default());
            let neutral = EligibleIsolate::neutral(self.candidate_id());
            matching.push(neutral.clone());
            for candidate in &matching {
                candidate.unhide(&component.name);
            }

            let winner = self
                .votes
                .vote(
                    &self.electors,
                    &matching,
                    component,
                    &format!("Distribution {pass}-{}", component.name),
                    &self.config.vote_kind,
                    &parameters,
                    Some(neutral.clone()),
                )?
                .unwrap_or_else(|| neutral.clone());

            let returning = winner.contains(&component.name);
            if !returning {
                winner.add_component(component.clone());
            }
            if winner.name().is_none() {
                winner.accept_rename();
            }
            for other in matching.iter().filter(|c| **c != winner) {
                other.reject_rename();
                other.hide([component.name.as_str()]);
            }

            if winner == neutral {
                candidates.push(winner.clone());
                new.push(winner.clone());
            } else if !returning && winner.is_wrapped() && !updated.contains(&winner) {
                updated.push(winner.clone());
            }
            debug!(
                pass,
                component = %component.name,
                isolate = %winner,
                returning,
                "component placed"
            );
        }

        for candidate in &new {
            if candidate.name().is_none() {
                let counter = self.next_isolate.fetch_add(1, Ordering::Relaxed);
                candidate.generate_name(&self.config.node_name, counter);
            }
        }

        let mut layout: Vec<Isolate> = candidates
            .iter()
            .filter_map(EligibleIsolate::to_isolate)
            .filter(|isolate| !isolate.components.is_empty())
            .collect();
        layout.sort_by(|a, b| a.name.cmp(&b.name));

        let distribution = Distribution {
            updated: updated.iter().filter_map(EligibleIsolate::to_isolate).collect(),
            new: new.iter().filter_map(EligibleIsolate::to_isolate).collect(),
            layout,
        };
        info!(
            pass,
            components = components.len(),
            new = distribution.new.len(),
            updated = distribution.updated.len(),
            "distribution computed"
        );
        Ok(distribution)
    }

    /// Forward a lifecycle event to every criterion.
    pub fn handle_event(&self, event: &LifecycleEvent) {
        debug!(kind = %event.kind, isolate = ?event.isolate, components = event.components.len(), "dispatching event");
        for elector in &self.electors {
            elector.handle_event(event);
        }
    }

    /// Make every criterion forget what it learnt.
    pub fn reset(&self) {
        for elector in &self.electors {
            elector.reset();
        }
        info!("criteria reset");
    }
}
