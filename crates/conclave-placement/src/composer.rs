//! Node composer — the feedback loop around the distributor.
//!
//! # Architecture
//!
//! ```text
//!   instantiate(components) ──▶ Distributor::distribute ──▶ NodeStatusStore::store
//!                                        ▲                          │
//!                                        │ votes                    │ neighbours
//!                                     criteria ◀── handle_event ────┤
//!                                        ▲                          │
//!   TickGenerator ── timer events ───────┤                          │
//!   handle_lost_isolate ── isolate.lost ─┘        remove + instantiate again
//! ```
//!
//! The status store is only written once a whole pass is decided, so a
//! failed vote never leaves a half-applied placement behind. Passes are
//! serialized: a crash reported during a redistribution is handled once the
//! redistribution has been committed, against the new layout.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use conclave_core::{Component, ConclaveConfig, Isolate, LifecycleEvent};
use conclave_criteria::EventSink;
use conclave_state::NodeStatusStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::distributor::{Distribution, Distributor};
use crate::electorate::Electorate;
use crate::error::PlacementResult;

/// A component changing isolate during a redistribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub component: String,
    pub from: String,
    pub to: String,
}

/// Difference between the layout before and after a redistribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redistribution {
    pub moved: Vec<Move>,
    /// Existing isolates that received components.
    pub extended: Vec<String>,
    /// Isolates created to host moved components.
    pub new: Vec<Isolate>,
    /// Isolates left without components.
    pub removed: Vec<String>,
}

impl Redistribution {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty()
    }
}

/// Places components on this node and keeps the status store in sync with
/// the decisions.
pub struct NodeComposer {
    distributor: Distributor,
    status: Arc<NodeStatusStore>,
    electorate: Option<Electorate>,
    /// Held from the status read to the status write of every pass.
    pass: Mutex<()>,
}

impl NodeComposer {
    pub fn new(distributor: Distributor, status: Arc<NodeStatusStore>) -> Self {
        Self {
            distributor,
            status,
            electorate: None,
            pass: Mutex::new(()),
        }
    }

    /// A composer with a fresh status store and the standard criteria.
    pub fn from_config(config: &ConclaveConfig) -> PlacementResult<Self> {
        config.validate()?;
        let status = Arc::new(NodeStatusStore::new());
        let electorate = Electorate::from_config(config, status.clone());
        let distributor = Distributor::new(electorate.electors(), config.placement.clone())?;
        info!(
            node = %config.placement.node_name,
            electors = ?distributor.electors(),
            vote_kind = %config.placement.vote_kind,
            "node composer ready"
        );
        Ok(Self {
            distributor,
            status,
            electorate: Some(electorate),
            pass: Mutex::new(()),
        })
    }

    fn pass(&self) -> MutexGuard<'_, ()> {
        self.pass.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    pub fn status(&self) -> &Arc<NodeStatusStore> {
        &self.status
    }

    /// The standard criteria, when built by [`NodeComposer::from_config`].
    pub fn electorate(&self) -> Option<&Electorate> {
        self.electorate.as_ref()
    }

    /// The isolate currently hosting a component.
    pub fn locate(&self, component: &str) -> PlacementResult<Isolate> {
        let name = self.status.get_isolate_for_component(component)?;
        Ok(self.status.isolate(&name)?)
    }

    /// Place components next to the running isolates and record the result.
    pub fn instantiate(&self, components: &[Component]) -> PlacementResult<Distribution> {
        let _pass = self.pass();
        self.place(components)
    }

    fn place(&self, components: &[Component]) -> PlacementResult<Distribution> {
        let running = self.status.running_isolates();
        let distribution = self.distributor.distribute(components, &running)?;

        let changed: Vec<Isolate> = distribution.changed().cloned().collect();
        self.status.store(&changed);
        for isolate in &distribution.new {
            info!(isolate = %isolate.name, components = ?isolate.component_names(), "new isolate");
        }
        for isolate in &distribution.updated {
            info!(isolate = %isolate.name, components = ?isolate.component_names(), "isolate extended");
        }
        Ok(distribution)
    }

    /// Vote again for every known component. The status store is replaced
    /// only when something moves.
    pub fn redistribute(&self) -> PlacementResult<Redistribution> {
        let _pass = self.pass();
        let components = self.status.components();
        if components.is_empty() {
            debug!("nothing to redistribute");
            return Ok(Redistribution::default());
        }
        let running = self.status.running_isolates();
        let before: BTreeMap<String, String> = running
            .iter()
            .flat_map(|isolate| {
                isolate
                    .components
                    .iter()
                    .map(move |c| (c.name.clone(), isolate.name.clone()))
            })
            .collect();

        let distribution = self.distributor.distribute(&components, &running)?;
        let after = distribution.placements();

        let moved: Vec<Move> = after
            .iter()
            .filter_map(|(component, to)| {
                before
                    .get(component)
                    .filter(|from| *from != to)
                    .map(|from| Move {
                        component: component.clone(),
                        from: from.clone(),
                        to: to.clone(),
                    })
            })
            .collect();
        if moved.is_empty() {
            debug!(components = components.len(), "redistribution changes nothing");
            return Ok(Redistribution::default());
        }

        let new_names: BTreeSet<&str> = distribution.new.iter().map(|i| i.name.as_str()).collect();
        let extended: BTreeSet<String> = moved
            .iter()
            .filter(|m| !new_names.contains(m.to.as_str()))
            .map(|m| m.to.clone())
            .collect();
        let remaining: BTreeSet<&String> = after.values().collect();
        let removed: Vec<String> = running
            .iter()
            .map(|isolate| isolate.name.clone())
            .filter(|name| !remaining.contains(name))
            .collect();

        self.status.replace(&distribution.layout);
        info!(
            moved = moved.len(),
            new = distribution.new.len(),
            removed = removed.len(),
            "components redistributed"
        );
        Ok(Redistribution {
            moved,
            extended: extended.into_iter().collect(),
            new: distribution.new,
            removed,
        })
    }

    /// An isolate died: forget it, tell the criteria, place its components
    /// again. Returns `None` when the isolate hosted nothing known.
    pub fn handle_lost_isolate(&self, isolate: &str) -> PlacementResult<Option<Distribution>> {
        let _pass = self.pass();
        let lost = self.status.get_components_for_isolate(isolate);
        if lost.is_empty() {
            warn!(isolate, "lost isolate hosted no known component");
            return Ok(None);
        }
        let names: Vec<&str> = lost.iter().map(|c| c.name.as_str()).collect();
        info!(isolate, components = ?names, "isolate lost");
        self.status.remove(&names);

        self.distributor
            .handle_event(&LifecycleEvent::isolate_lost(Some(isolate), lost.iter().cloned()));
        self.place(&lost).map(Some)
    }

    /// Forget components stopped on purpose. Their isolates disappear once
    /// empty.
    pub fn kill<S: AsRef<str>>(&self, components: &[S]) {
        let _pass = self.pass();
        self.status.remove(components);
        info!(components = components.len(), "components killed");
    }

    /// Make every criterion forget what it learnt.
    pub fn reset_criteria(&self) {
        self.distributor.reset();
    }

    /// Start the stability ticks of the standard timer criterion. Does
    /// nothing for a composer built without it. Must be called from within a
    /// tokio runtime.
    ///
    /// The tick task only holds a weak reference: dropping the last `Arc`
    /// of the composer stops the ticks.
    pub fn start_ticking(self: &Arc<Self>) {
        match &self.electorate {
            Some(electorate) => electorate.timer.start(Arc::new(TickSink(Arc::downgrade(self)))),
            None => warn!("no tick generator configured"),
        }
    }

    pub async fn stop_ticking(&self) {
        if let Some(electorate) = &self.electorate {
            electorate.timer.stop().await;
        }
    }
}

impl EventSink for NodeComposer {
    fn publish(&self, event: LifecycleEvent) {
        self.distributor.handle_event(&event);
    }
}

/// Ticks delivered to a composer that may already be gone.
struct TickSink(Weak<NodeComposer>);

impl EventSink for TickSink {
    fn publish(&self, event: LifecycleEvent) {
        match self.0.upgrade() {
            Some(composer) => composer.publish(event),
            None => debug!("tick dropped, composer gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use conclave_core::{EligibleIsolate, PlacementConfig};
    use conclave_criteria::Criterion;
    use conclave_vote::{Ballot, Elector, Verdict};

    fn comp(name: &str) -> Component {
        Component::new(name, format!("{name}-factory"))
            .unwrap()
            .with_language("python")
    }

    fn composer() -> NodeComposer {
        NodeComposer::from_config(&ConclaveConfig::default()).unwrap()
    }

    #[test]
    fn instantiate_records_the_placement() {
        let composer = composer();
        let distribution = composer.instantiate(&[comp("a"), comp("b")]).unwrap();

        assert_eq!(distribution.new.len(), 1);
        let isolate = &distribution.new[0].name;
        assert_eq!(composer.status().get_isolate_for_component("a").unwrap(), *isolate);
        assert!(composer.status().neighbours(&["a", "b"]));
    }

    #[test]
    fn locate_unknown_component_fails() {
        let composer = composer();
        composer.instantiate(&[comp("a")]).unwrap();
        assert_eq!(composer.locate("a").unwrap().component_names(), vec!["a"]);
        assert!(matches!(
            composer.locate("zz"),
            Err(crate::PlacementError::Status(_))
        ));
    }

    #[test]
    fn lost_unknown_isolate_is_ignored() {
        let composer = composer();
        assert!(composer.handle_lost_isolate("ghost").unwrap().is_none());
    }

    #[test]
    fn redistribute_of_a_stable_layout_changes_nothing() {
        let composer = composer();
        composer.instantiate(&[comp("a"), comp("b")]).unwrap();
        let before = composer.status().snapshot();

        let delta = composer.redistribute().unwrap();
        assert!(delta.is_empty());
        assert_eq!(composer.status().snapshot(), before);
    }

    #[test]
    fn redistribute_on_empty_store_is_empty() {
        assert!(composer().redistribute().unwrap().is_empty());
    }

    #[test]
    fn kill_forgets_components() {
        let composer = composer();
        composer.instantiate(&[comp("a")]).unwrap();
        composer.kill(&["a"]);
        assert!(composer.status().isolates().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ConclaveConfig::default();
        config.placement.max_rounds = 0;
        assert!(NodeComposer::from_config(&config).is_err());
    }

    /// Votes blank. Its first vote blocks until released.
    struct Gate {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Elector<EligibleIsolate, Component> for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        fn vote(
            &self,
            _candidates: &[EligibleIsolate],
            _subject: &Component,
            ballot: &mut Ballot<EligibleIsolate>,
        ) -> Verdict<EligibleIsolate> {
            let entered = self.entered.lock().unwrap().take();
            if let Some(entered) = entered {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            ballot.lock();
            Verdict::Cast
        }
    }

    impl Criterion for Gate {
        fn handle_event(&self, _event: &LifecycleEvent) {}
    }

    #[test]
    fn lost_isolate_waits_for_the_running_redistribution() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });
        let distributor =
            Distributor::new(vec![gate as Arc<dyn Criterion>], PlacementConfig::default()).unwrap();
        let status = Arc::new(NodeStatusStore::new());
        status.store(&[
            Isolate::new("iso1", Some("python"), vec![comp("a")]),
            Isolate::new("iso2", Some("python"), vec![comp("b")]),
        ]);
        let composer = Arc::new(NodeComposer::new(distributor, status));

        let redistribution = {
            let composer = composer.clone();
            thread::spawn(move || composer.redistribute().unwrap())
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let recovery = {
            let composer = composer.clone();
            thread::spawn(move || {
                let outcome = composer.handle_lost_isolate("iso2").unwrap();
                done_tx.send(outcome.is_none()).unwrap();
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        release_tx.send(()).unwrap();
        let delta = redistribution.join().unwrap();
        assert_eq!(delta.removed, vec!["iso1", "iso2"]);

        // iso2 was already retired by the redistribution.
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        recovery.join().unwrap();
        assert_eq!(composer.locate("b").unwrap().name, "node-python-auto02");
        assert_eq!(
            composer.status().isolates(),
            vec!["node-python-auto01", "node-python-auto02"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticking_does_not_keep_the_composer_alive() {
        let composer = Arc::new(composer());
        composer.start_ticking();
        let weak = Arc::downgrade(&composer);

        drop(composer);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_reach_the_criteria() {
        let composer = Arc::new(composer());
        composer.instantiate(&[comp("a")]).unwrap();
        let crash = composer.electorate().unwrap().crash.clone();
        assert_eq!(crash.rating("a"), Some(50.0));

        composer.start_ticking();
        tokio::time::sleep(std::time::Duration::from_secs(46)).await;
        composer.stop_ticking().await;

        // Never crashed: the long stability bonus applies.
        assert_eq!(crash.rating("a"), Some(58.0));
    }
}
