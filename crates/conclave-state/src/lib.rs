//! conclave-state — the node status store.
//!
//! Tracks which isolate hosts which component on this node. The store is
//! the single source of truth for "who runs where"; it is shared between the
//! placement pass, the stability tick generator and the crash handling path,
//! all behind one internal lock.
//!
//! The store lives in memory only. Carrying it across restarts is left to
//! the surrounding platform, which can rebuild it from [`StatusSnapshot`].

pub mod error;
pub mod store;

pub use error::{StatusError, StatusResult};
pub use store::{NodeStatusStore, StatusSnapshot};
