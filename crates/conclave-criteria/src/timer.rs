//! Stability ticks — background task emitting "timer" events.
//!
//! Every `interval`, the [`TickGenerator`] walks the isolates of the node
//! status store and publishes one timer event per isolate whose components
//! did not take part in a crash since the previous tick. The other criteria
//! turn those events into rating bonuses.
//!
//! # Architecture
//!
//! ```text
//!   handle_event(isolate.lost) ──▶ erroneous factories
//!          │
//!          ▼
//!   TickGenerator::start(sink)
//!          │ tokio::spawn
//!          ▼
//!   loop { select! { sleep(interval) => tick → sink.publish(..),
//!                    shutdown.changed() => break } }
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use conclave_core::{Component, EligibleIsolate, EventKind, LifecycleEvent, TimerConfig};
use conclave_state::NodeStatusStore;
use conclave_vote::{Ballot, Elector, Verdict};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Criterion, EventSink};

/// State shared between the criterion and the tick task.
struct TickState {
    status: Arc<NodeStatusStore>,
    /// Factories of the components lost since the previous tick.
    erroneous: Mutex<BTreeSet<String>>,
}

impl TickState {
    fn erroneous(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.erroneous.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> Vec<LifecycleEvent> {
        let mut erroneous = self.erroneous();
        let events = self
            .status
            .running_isolates()
            .into_iter()
            .filter(|isolate| !isolate.components.is_empty())
            .filter(|isolate| {
                isolate
                    .components
                    .iter()
                    .all(|c| !erroneous.contains(&c.factory))
            })
            .map(|isolate| {
                LifecycleEvent::timer(Some(&isolate.name), isolate.components.iter().cloned())
            })
            .collect();
        erroneous.clear();
        events
    }
}

/// Background task slot.
struct TickerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Periodic source of stability ticks, also registered as a (silent)
/// elector so it hears about crashes.
pub struct TickGenerator {
    interval: Duration,
    state: Arc<TickState>,
    slot: Mutex<Option<TickerSlot>>,
}

impl TickGenerator {
    pub fn new(config: &TimerConfig, status: Arc<NodeStatusStore>) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            state: Arc::new(TickState {
                status,
                erroneous: Mutex::new(BTreeSet::new()),
            }),
            slot: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<TickerSlot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Factories currently excluded from the next tick.
    pub fn erroneous_factories(&self) -> Vec<String> {
        self.state.erroneous().iter().cloned().collect()
    }

    /// Compute one tick by hand: the events it would publish. Resets the
    /// erroneous factories like a scheduled tick does.
    pub fn tick(&self) -> Vec<LifecycleEvent> {
        self.state.tick()
    }

    /// Start ticking into `sink`. A running ticker is replaced. Must be
    /// called from within a tokio runtime.
    pub fn start(&self, sink: Arc<dyn EventSink>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            run_tick_loop(state, interval, sink, shutdown_rx).await;
        });

        if let Some(old) = self.slot().replace(TickerSlot {
            handle,
            shutdown_tx,
        }) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        info!(interval_secs = interval.as_secs(), "tick generator started");
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    /// Stop ticking. Once this returns, no further tick is published.
    pub async fn stop(&self) {
        let slot = self.slot().take();
        if let Some(slot) = slot {
            let _ = slot.shutdown_tx.send(true);
            let _ = slot.handle.await;
            info!("tick generator stopped");
        }
    }
}

impl Drop for TickGenerator {
    fn drop(&mut self) {
        if let Some(slot) = self.slot().take() {
            slot.handle.abort();
        }
    }
}

async fn run_tick_loop(
    state: Arc<TickState>,
    interval: Duration,
    sink: Arc<dyn EventSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("tick loop starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let events = state.tick();
                debug!(isolates = events.len(), "stability tick");
                for event in events {
                    sink.publish(event);
                }
            }
            _ = shutdown.changed() => {
                debug!("tick loop shutting down");
                break;
            }
        }
    }
}

impl Elector<EligibleIsolate, Component> for TickGenerator {
    fn name(&self) -> &str {
        "timer"
    }

    fn vote(
        &self,
        _candidates: &[EligibleIsolate],
        _subject: &Component,
        ballot: &mut Ballot<EligibleIsolate>,
    ) -> Verdict<EligibleIsolate> {
        ballot.lock();
        Verdict::Cast
    }
}

impl Criterion for TickGenerator {
    fn handle_event(&self, event: &LifecycleEvent) {
        if event.kind == EventKind::IsolateLost {
            self.state
                .erroneous()
                .extend(event.components.iter().map(|c| c.factory.clone()));
        }
    }

    fn reset(&self) {
        self.state.erroneous().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::Isolate;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl Recorder {
        fn isolates(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| e.isolate.clone())
                .collect()
        }
    }

    impl EventSink for Recorder {
        fn publish(&self, event: LifecycleEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn comp(name: &str, factory: &str) -> Component {
        Component::new(name, factory).unwrap().with_language("python")
    }

    fn status() -> Arc<NodeStatusStore> {
        let status = Arc::new(NodeStatusStore::new());
        status.store(&[
            Isolate::new("iso1", Some("python"), vec![comp("a", "fa"), comp("b", "fb")]),
            Isolate::new("iso2", Some("python"), vec![comp("c", "fc")]),
        ]);
        status
    }

    fn generator(status: Arc<NodeStatusStore>) -> TickGenerator {
        TickGenerator::new(&TimerConfig { interval_secs: 45 }, status)
    }

    #[test]
    fn vote_is_blank() {
        let ticker = generator(status());
        let mut ballot = Ballot::new("timer");
        let verdict = ticker.vote(&[EligibleIsolate::neutral(1)], &comp("a", "fa"), &mut ballot);
        assert_eq!(verdict, Verdict::Cast);
        assert!(ballot.is_blank());
        assert!(ballot.is_locked());
    }

    #[test]
    fn lost_factories_skip_one_tick() {
        let ticker = generator(status());
        ticker.handle_event(&LifecycleEvent::isolate_lost(Some("iso2"), vec![comp("c", "fc")]));
        assert_eq!(ticker.erroneous_factories(), vec!["fc"]);

        let first: Vec<_> = ticker.tick().into_iter().filter_map(|e| e.isolate).collect();
        assert_eq!(first, vec!["iso1"]);
        assert!(ticker.erroneous_factories().is_empty());

        let second: Vec<_> = ticker.tick().into_iter().filter_map(|e| e.isolate).collect();
        assert_eq!(second, vec!["iso1", "iso2"]);
    }

    #[test]
    fn tick_events_carry_components() {
        let ticker = generator(status());
        let events = ticker.tick();
        assert!(events.iter().all(|e| e.kind == EventKind::Timer));
        let names: Vec<String> = events[0].component_names().into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let ticker = generator(status());
        let sink = Arc::new(Recorder::default());
        ticker.start(sink.clone());
        assert!(ticker.is_running());

        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(sink.isolates(), vec!["iso1", "iso2"]);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(sink.isolates().len(), 4);

        ticker.stop().await;
        assert!(!ticker.is_running());
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(sink.isolates().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop() {
        let ticker = generator(status());
        let sink = Arc::new(Recorder::default());

        ticker.start(sink.clone());
        ticker.stop().await;
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(sink.isolates().is_empty());

        ticker.start(sink.clone());
        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(sink.isolates().len(), 2);
        ticker.stop().await;
    }

    /// Blocks inside the first `publish` until released.
    struct Gate {
        entered: Mutex<Option<std::sync::mpsc::Sender<()>>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
        published: Mutex<usize>,
    }

    impl EventSink for Gate {
        fn publish(&self, _event: LifecycleEvent) {
            let entered = self.entered.lock().unwrap().take();
            if let Some(entered) = entered {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            *self.published.lock().unwrap() += 1;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_the_tick_being_published() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let sink = Arc::new(Gate {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
            published: Mutex::new(0),
        });
        let ticker = Arc::new(TickGenerator::new(&TimerConfig { interval_secs: 1 }, status()));
        ticker.start(sink.clone());

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let stopping = {
            let ticker = ticker.clone();
            tokio::spawn(async move { ticker.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!stopping.is_finished());

        release_tx.send(()).unwrap();
        stopping.await.unwrap();
        // Both isolates of the interrupted tick, nothing after.
        assert_eq!(*sink.published.lock().unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(*sink.published.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let ticker = generator(status());
        ticker.stop().await;
        assert!(!ticker.is_running());
    }
}
