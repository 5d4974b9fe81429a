//! Configuration criterion: components pinned to an isolate go there.

use conclave_core::{Component, EligibleIsolate, LifecycleEvent};
use conclave_vote::{Ballot, Elector, Verdict};
use tracing::debug;

use crate::Criterion;

/// Honours the isolate name a composition pins a component to.
///
/// When the pinned isolate is already a candidate it is imposed with a coup
/// d'état. Otherwise the neutral candidates (nameless and empty) are asked
/// to take the pinned name; if exactly one agrees it gets the vote and
/// everyone else a vote against. Unnamed isolates already hosting
/// components are never offered the name. Components without a pinned isolate get a blank ballot.
#[derive(Debug, Default)]
pub struct ConfigurationCriterion;

impl ConfigurationCriterion {
    pub fn new() -> Self {
        Self
    }
}

impl Elector<EligibleIsolate, Component> for ConfigurationCriterion {
    fn name(&self) -> &str {
        "configuration"
    }

    fn vote(
        &self,
        candidates: &[EligibleIsolate],
        subject: &Component,
        ballot: &mut Ballot<EligibleIsolate>,
    ) -> Verdict<EligibleIsolate> {
        let Some(pinned) = subject.isolate.as_deref() else {
            ballot.lock();
            return Verdict::Cast;
        };

        if let Some(target) = candidates
            .iter()
            .find(|c| c.name().as_deref() == Some(pinned))
        {
            debug!(component = %subject.name, isolate = pinned, "pinned isolate found");
            ballot.lock();
            return Verdict::CoupDEtat(target.clone());
        }

        let accepting: Vec<&EligibleIsolate> = candidates
            .iter()
            .filter(|c| c.is_neutral() && c.propose_rename(pinned))
            .collect();
        if let [adopter] = accepting.as_slice() {
            debug!(component = %subject.name, isolate = pinned, candidate = adopter.id(), "pinned isolate will be created");
            ballot.append_for((*adopter).clone());
        }
        for candidate in candidates {
            if !ballot.votes_for().contains(candidate) {
                ballot.append_against(candidate.clone());
            }
        }
        ballot.lock();
        Verdict::Cast
    }
}

impl Criterion for ConfigurationCriterion {
    fn handle_event(&self, _event: &LifecycleEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::Isolate;

    fn comp(name: &str) -> Component {
        Component::new(name, "factory").unwrap().with_language("python")
    }

    #[test]
    fn unpinned_component_gets_blank_ballot() {
        let mut ballot = Ballot::new("configuration");
        let verdict = ConfigurationCriterion.vote(&[EligibleIsolate::neutral(1)], &comp("a"), &mut ballot);
        assert_eq!(verdict, Verdict::Cast);
        assert!(ballot.is_blank());
        assert!(ballot.is_locked());
    }

    #[test]
    fn existing_pinned_isolate_is_imposed() {
        let pinned = EligibleIsolate::wrap(1, &Isolate::new("db", Some("python"), vec![comp("x")]));
        let candidates = [EligibleIsolate::neutral(2), pinned.clone()];
        let mut ballot = Ballot::new("configuration");

        let verdict = ConfigurationCriterion.vote(&candidates, &comp("a").with_isolate("db"), &mut ballot);
        assert_eq!(verdict, Verdict::CoupDEtat(pinned));
    }

    #[test]
    fn neutral_adopts_pinned_name() {
        let other = EligibleIsolate::wrap(1, &Isolate::new("web", Some("python"), vec![comp("x")]));
        let neutral = EligibleIsolate::neutral(2);
        let candidates = [other.clone(), neutral.clone()];
        let mut ballot = Ballot::new("configuration");

        let verdict = ConfigurationCriterion.vote(&candidates, &comp("a").with_isolate("db"), &mut ballot);
        assert_eq!(verdict, Verdict::Cast);
        assert_eq!(ballot.votes_for(), &[neutral.clone()]);
        assert_eq!(ballot.votes_against(), &[other]);
        assert_eq!(neutral.proposed_name().as_deref(), Some("db"));
    }

    #[test]
    fn occupied_unnamed_candidate_is_not_offered_the_name() {
        let occupied = EligibleIsolate::new(1, None, Some("python"), vec![comp("x")]);
        let neutral = EligibleIsolate::neutral(2);
        let candidates = [occupied.clone(), neutral.clone()];
        let mut ballot = Ballot::new("configuration");

        ConfigurationCriterion.vote(&candidates, &comp("a").with_isolate("db"), &mut ballot);
        assert_eq!(ballot.votes_for(), &[neutral.clone()]);
        assert_eq!(ballot.votes_against(), &[occupied.clone()]);
        assert_eq!(occupied.proposed_name(), None);
        assert_eq!(neutral.proposed_name().as_deref(), Some("db"));
    }

    #[test]
    fn no_adopter_rejects_everyone() {
        let neutral = EligibleIsolate::neutral(2);
        neutral.propose_rename("taken");
        let candidates = [neutral.clone()];
        let mut ballot = Ballot::new("configuration");

        ConfigurationCriterion.vote(&candidates, &comp("a").with_isolate("db"), &mut ballot);
        assert!(ballot.votes_for().is_empty());
        assert_eq!(ballot.votes_against(), &[neutral]);
    }
}
