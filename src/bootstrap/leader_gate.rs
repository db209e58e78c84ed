//! Leader-gated controller orchestration.
//!
//! The gate owns the leadership-term lifecycle: on every acquisition it
//! builds a fresh bundle of caches and controllers, gates them on cache
//! sync, runs them until the term token fires, then releases the bundle
//! wholesale. Instances are never reused across terms.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{BootstrapError, CacheSync, Controller, wait_for_cache_sync};

/// One leadership term's exclusively-owned bundle.
pub struct LeaderTerm {
    /// Caches backing this term's controllers. Synced before any controller
    /// starts, released when the term ends.
    pub caches: Vec<Arc<dyn CacheSync>>,
    /// Controllers that run only while this process holds leadership.
    pub controllers: Vec<Controller>,
}

/// Builds a fresh [`LeaderTerm`] for each leadership acquisition.
#[async_trait]
pub trait LeaderTermFactory: Send + Sync {
    async fn build(&self) -> super::Result<LeaderTerm>;
}

/// Invoked by an [`Elector`] once per successful acquisition. The call is
/// expected to block for the duration of the term; the token is cancelled
/// on leadership loss and on process shutdown.
#[async_trait]
pub trait TermHandler: Send + Sync {
    async fn on_acquired(&self, term: CancellationToken);
}

/// Leadership primitive facade. `run` participates in the election until
/// the shutdown token fires, invoking the handler once per acquisition with
/// a term token derived from `shutdown` that is additionally cancelled on
/// leadership loss.
#[async_trait]
pub trait Elector: Send + Sync {
    async fn run(
        &self,
        shutdown: CancellationToken,
        handler: Arc<dyn TermHandler>,
    ) -> super::Result<()>;
}

/// Orchestrates leader-only controllers across leadership terms.
pub struct LeaderGate {
    factory: Arc<dyn LeaderTermFactory>,
    cache_sync_timeout: Duration,
    shutdown: CancellationToken,
    fatal: Mutex<Option<BootstrapError>>,
}

impl LeaderGate {
    pub fn new(
        factory: Arc<dyn LeaderTermFactory>,
        cache_sync_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            factory,
            cache_sync_timeout,
            shutdown,
            fatal: Mutex::new(None),
        }
    }

    /// Take the fatal error recorded during a term, if any. A recorded
    /// fatal error has already cancelled the shutdown token; the caller
    /// turns it into a non-zero exit.
    pub fn take_fatal(&self) -> Option<BootstrapError> {
        self.fatal.lock().ok().and_then(|mut guard| guard.take())
    }

    fn fail(&self, error: BootstrapError) {
        error!(error = %error, "Fatal error in leadership term");
        if let Ok(mut guard) = self.fatal.lock() {
            guard.get_or_insert(error);
        }
        self.shutdown.cancel();
    }
}

#[async_trait]
impl TermHandler for LeaderGate {
    async fn on_acquired(&self, term: CancellationToken) {
        info!("Leadership acquired, constructing leader controllers");

        // Every term gets fresh caches and controllers.
        let bundle = match self.factory.build().await {
            Ok(bundle) => bundle,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        // No controller may start against an unsynced cache.
        if let Err(e) =
            wait_for_cache_sync(&term, self.cache_sync_timeout, &bundle.caches).await
        {
            self.fail(e);
            return;
        }

        let mut tasks = JoinSet::new();
        for controller in &bundle.controllers {
            controller.spawn(term.clone(), &mut tasks);
        }

        // Completion barrier: the term is over once every controller has
        // observed cancellation and returned.
        while tasks.join_next().await.is_some() {}
        info!("Leadership term ended, leader controllers released");
        // `bundle` drops here, releasing the term's caches.
    }
}
