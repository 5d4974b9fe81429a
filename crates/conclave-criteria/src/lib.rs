//! conclave-criteria — the electors of a placement vote.
//!
//! Each criterion looks at a component from one angle and fills a ballot
//! accordingly. The stateful ones learn from lifecycle events (crashes and
//! stability ticks) and keep their memory behind their own lock, so events
//! and votes may arrive from different tasks.
//!
//! | Criterion        | Kind         | Memory                                  |
//! |------------------|--------------|-----------------------------------------|
//! | `configuration`  | distance     | none: honours pinned isolates           |
//! | `crash`          | reliability  | rating per component                    |
//! | `compatibility`  | distance     | rating per pair of components           |
//! | `history`        | distance     | sets of components that crashed together|
//! | `timer`          | reliability  | factories lost since the previous tick  |

pub mod compatibility;
pub mod configuration;
pub mod crash;
pub mod history;
pub mod timer;

use conclave_core::{Component, EligibleIsolate, LifecycleEvent};
use conclave_vote::Elector;

pub use compatibility::{CompatibilityCriterion, CompatibilitySnapshot};
pub use configuration::ConfigurationCriterion;
pub use crash::{CrashCriterion, CrashSnapshot};
pub use history::{HistoryCriterion, HistorySnapshot};
pub use timer::TickGenerator;

/// An elector taking part in placement votes.
pub trait Criterion: Elector<EligibleIsolate, Component> {
    /// Learn from a crash or a stability tick.
    fn handle_event(&self, event: &LifecycleEvent);

    /// Forget everything learnt so far.
    fn reset(&self) {}
}

/// Receiver of the lifecycle events produced by the tick generator.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Lowest and highest rating.
pub const RATING_BOUNDS: (f64, f64) = (0.0, 100.0);

pub(crate) fn clamp_rating(rating: f64) -> f64 {
    rating.clamp(RATING_BOUNDS.0, RATING_BOUNDS.1)
}
