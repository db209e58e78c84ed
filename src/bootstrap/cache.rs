//! Cache readiness gating.
//!
//! A controller must never process events against an unsynced cache. The
//! gate waits for every cache concurrently and fails fatally if any of them
//! misses the deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::BootstrapError;

/// Readiness handle for an informer-backed cache.
#[async_trait]
pub trait CacheSync: Send + Sync {
    /// Name used in sync-failure diagnostics.
    fn name(&self) -> &str;

    /// Resolve true once the cache has received its initial full listing.
    /// Resolving false (or cancellation) means the cache cannot sync.
    async fn wait_ready(&self, token: CancellationToken) -> bool;
}

/// Wait for all caches to sync within the deadline.
///
/// Fatal on failure: callers treat the error as unrecoverable for this
/// process instance.
pub async fn wait_for_cache_sync(
    token: &CancellationToken,
    timeout: Duration,
    caches: &[Arc<dyn CacheSync>],
) -> super::Result<()> {
    let waits = caches.iter().map(|cache| {
        let token = token.clone();
        async move {
            match tokio::time::timeout(timeout, cache.wait_ready(token)).await {
                Ok(true) => {
                    debug!(cache = %cache.name(), "Cache synced");
                    Ok(())
                }
                Ok(false) => {
                    error!(cache = %cache.name(), "Cache sync failed");
                    Err(BootstrapError::CacheSyncTimeout(cache.name().to_string()))
                }
                Err(_) => {
                    error!(cache = %cache.name(), timeout = ?timeout, "Cache sync timed out");
                    Err(BootstrapError::CacheSyncTimeout(cache.name().to_string()))
                }
            }
        }
    });
    futures::future::try_join_all(waits).await.map(|_| ())
}
