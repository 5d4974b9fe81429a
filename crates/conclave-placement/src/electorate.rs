//! The standard set of criteria voting on placements.

use std::sync::Arc;

use conclave_core::ConclaveConfig;
use conclave_criteria::{
    CompatibilityCriterion, ConfigurationCriterion, CrashCriterion, Criterion, HistoryCriterion,
    TickGenerator,
};
use conclave_state::NodeStatusStore;

/// Typed handles on every criterion, so callers can inspect or export
/// their memory while the distributor holds them as electors.
#[derive(Clone)]
pub struct Electorate {
    pub configuration: Arc<ConfigurationCriterion>,
    pub crash: Arc<CrashCriterion>,
    pub compatibility: Arc<CompatibilityCriterion>,
    pub history: Arc<HistoryCriterion>,
    pub timer: Arc<TickGenerator>,
}

impl Electorate {
    pub fn from_config(config: &ConclaveConfig, status: Arc<NodeStatusStore>) -> Self {
        Self {
            configuration: Arc::new(ConfigurationCriterion::new()),
            crash: Arc::new(CrashCriterion::new(config.crash.clone())),
            compatibility: Arc::new(CompatibilityCriterion::new(
                config.compatibility.clone(),
                status.clone(),
            )),
            history: Arc::new(HistoryCriterion::new()),
            timer: Arc::new(TickGenerator::new(&config.timer, status)),
        }
    }

    /// The criteria in voting order. The configuration criterion comes
    /// first so that a pinned isolate ends the vote before anyone else
    /// is asked.
    pub fn electors(&self) -> Vec<Arc<dyn Criterion>> {
        vec![
            self.configuration.clone() as Arc<dyn Criterion>,
            self.crash.clone() as Arc<dyn Criterion>,
            self.compatibility.clone() as Arc<dyn Criterion>,
            self.history.clone() as Arc<dyn Criterion>,
            self.timer.clone() as Arc<dyn Criterion>,
        ]
    }
}
