//! conclave-core — shared types for the Conclave placement core.
//!
//! Everything the election-based scheduler exchanges with its surroundings
//! lives here:
//!
//! - **`types`** — components, committed isolates, lifecycle events
//! - **`candidate`** — isolates under construction during an election
//! - **`config`** — tunables for criteria, timer and vote (TOML)

pub mod candidate;
pub mod config;
pub mod error;
pub mod types;

pub use candidate::EligibleIsolate;
pub use config::{
    CompatibilityConfig, ConclaveConfig, CrashConfig, PlacementConfig, TimerConfig,
};
pub use error::{CoreError, CoreResult};
pub use types::*;
