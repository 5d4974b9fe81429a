//! conclave.toml configuration parser.
//!
//! Every section and field is optional; missing values take the documented
//! defaults.
//!
//! ```toml
//! [placement]
//! node_name = "node1"
//! penalty = 5
//! exclusion = 2
//!
//! [crash]
//! unstable_threshold = 5.0
//!
//! [timer]
//! interval_secs = 45
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConclaveConfig {
    pub placement: PlacementConfig,
    pub crash: CrashConfig,
    pub compatibility: CompatibilityConfig,
    pub timer: TimerConfig,
}

/// Distributor and vote parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Node name, used to generate isolate names.
    pub node_name: String,
    /// Engine used for placement votes.
    pub vote_kind: String,
    /// Score removed from a candidate for each vote against it.
    pub penalty: i64,
    /// Number of votes against beyond which a candidate is vetoed.
    pub exclusion: usize,
    /// Number of "for" entries counted per ballot.
    pub votes_per_elector: usize,
    /// Maximum number of rounds before falling back to the default.
    pub max_rounds: usize,
    /// Number of vote records kept for inspection.
    pub history_capacity: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            node_name: "node".to_string(),
            vote_kind: "approbation".to_string(),
            penalty: 5,
            exclusion: 2,
            votes_per_elector: 1,
            max_rounds: 3,
            history_capacity: 128,
        }
    }
}

/// Crash-reliability criterion tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    /// Rating of a component seen for the first time as a vote subject.
    pub default_rating: f64,
    /// Rating of an unknown component already hosted by a candidate.
    pub occupant_default_rating: f64,
    /// Below this rating a component is unstable for good.
    pub unstable_threshold: f64,
    pub recent_window_secs: u64,
    pub recent_crash_penalty: f64,
    pub crash_penalty: f64,
    pub long_stability_secs: u64,
    pub long_stability_bonus: f64,
    pub stability_bonus: f64,
    /// Maximum rating distance with the occupants of a shared isolate.
    pub max_distance: f64,
    /// Minimum rating required to share an isolate.
    pub min_shared_rating: f64,
    /// Distance given to the neutral candidate.
    pub neutral_distance: f64,
    /// Distance given to a named, empty candidate.
    pub named_empty_distance: f64,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            default_rating: 50.0,
            occupant_default_rating: 90.0,
            unstable_threshold: 5.0,
            recent_window_secs: 60,
            recent_crash_penalty: 10.0,
            crash_penalty: 5.0,
            long_stability_secs: 120,
            long_stability_bonus: 8.0,
            stability_bonus: 4.0,
            max_distance: 20.0,
            min_shared_rating: 20.0,
            neutral_distance: 20.0,
            named_empty_distance: 5.0,
        }
    }
}

/// Pairwise-compatibility criterion tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityConfig {
    /// Rating of an unknown pair. Sits between the empty-isolate and the
    /// previous-isolate ratings.
    pub default_rating: f64,
    pub empty_isolate_rating: f64,
    pub previous_isolate_rating: f64,
    pub incompatible_threshold: f64,
    pub recent_window_secs: u64,
    pub recent_crash_penalty: f64,
    pub crash_penalty: f64,
    pub stable_bonus: f64,
    pub recent_bonus: f64,
    pub crash_neighbour_factor: f64,
    pub tick_neighbour_factor: f64,
    /// Minimum rating for a "for" vote.
    pub accept_threshold: f64,
    /// Below this rating the candidate gets an "against" vote.
    pub reject_threshold: f64,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            default_rating: 92.0,
            empty_isolate_rating: 90.0,
            previous_isolate_rating: 95.0,
            incompatible_threshold: 5.0,
            recent_window_secs: 60,
            recent_crash_penalty: 5.0,
            crash_penalty: 1.0,
            stable_bonus: 5.0,
            recent_bonus: 1.0,
            crash_neighbour_factor: 3.0,
            tick_neighbour_factor: 2.0,
            accept_threshold: 50.0,
            reject_threshold: 30.0,
        }
    }
}

/// Stability tick generator tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub interval_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { interval_secs: 45 }
    }
}

impl ConclaveConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(?path, "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: ConclaveConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> CoreResult<()> {
        let ratings = [
            ("crash.default_rating", self.crash.default_rating),
            ("crash.occupant_default_rating", self.crash.occupant_default_rating),
            ("crash.unstable_threshold", self.crash.unstable_threshold),
            ("compatibility.default_rating", self.compatibility.default_rating),
            ("compatibility.empty_isolate_rating", self.compatibility.empty_isolate_rating),
            (
                "compatibility.previous_isolate_rating",
                self.compatibility.previous_isolate_rating,
            ),
            (
                "compatibility.incompatible_threshold",
                self.compatibility.incompatible_threshold,
            ),
            ("compatibility.accept_threshold", self.compatibility.accept_threshold),
            ("compatibility.reject_threshold", self.compatibility.reject_threshold),
        ];
        for (key, value) in ratings {
            if !(0.0..=100.0).contains(&value) {
                return Err(CoreError::InvalidConfig(format!(
                    "{key} must lie in [0, 100], got {value}"
                )));
            }
        }
        if self.placement.max_rounds == 0 {
            return Err(CoreError::InvalidConfig(
                "placement.max_rounds must be at least 1".to_string(),
            ));
        }
        if self.placement.node_name.is_empty() {
            return Err(CoreError::InvalidConfig(
                "placement.node_name can't be empty".to_string(),
            ));
        }
        if self.timer.interval_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "timer.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
