//! Controller lifecycle and leader-gated orchestration.
//!
//! Always-on controllers are constructed once and run for the process
//! lifetime. Leader-only controllers are constructed fresh on every
//! leadership acquisition and torn down wholesale when the term ends. No
//! controller starts before its caches have synced; a cache that cannot
//! sync is fatal to the process.

mod cache;
mod controller;
mod leader_gate;

pub use cache::{CacheSync, wait_for_cache_sync};
pub use controller::{Controller, ControllerRunner};
pub use leader_gate::{Elector, LeaderGate, LeaderTerm, LeaderTermFactory, TermHandler};

use thiserror::Error;

/// Fatal bootstrap failures. The process exits non-zero on any of these;
/// restart is the recovery mechanism.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// An informer cache did not become ready in time.
    #[error("failed to wait for cache sync: {0}")]
    CacheSyncTimeout(String),

    /// The leadership primitive failed to initialize.
    #[error("failed to initialize leader election: {0}")]
    LeadershipInit(String),

    /// A leadership term's controllers could not be constructed.
    #[error("failed to create leader controllers: {0}")]
    LeaderSetup(String),
}

/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;
