//! Lease-based leader election.
//!
//! Wraps a coordination Lease behind the [`Elector`] trait. The elector
//! loops between standby and a held term: on acquisition it hands the
//! [`TermHandler`] a token derived from the shutdown token, cancels that
//! token on leadership loss or renewal failure, waits for the handler to
//! finish, and re-enters standby. Losing the lease does not terminate the
//! process; always-on work keeps running.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::{Elector, TermHandler};
use crate::health::HealthState;

/// Lease name claimed by the operator.
pub const LEASE_NAME: &str = "policy-operator-leader";
/// Lease time-to-live.
pub const LEASE_TTL_SECS: u64 = 15;
/// Interval between acquire/renew attempts.
pub const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Leader elector backed by a Kubernetes coordination Lease.
pub struct LeaseElector {
    client: Client,
    namespace: String,
    holder_id: String,
    renew_interval: Duration,
    health: Option<Arc<HealthState>>,
}

impl LeaseElector {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        holder_id: impl Into<String>,
        health: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            holder_id: holder_id.into(),
            renew_interval: Duration::from_secs(LEASE_RENEW_INTERVAL_SECS),
            health,
        }
    }

    fn lease_lock(&self) -> LeaseLock {
        LeaseLock::new(
            self.client.clone(),
            &self.namespace,
            LeaseLockParams {
                holder_id: self.holder_id.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
            },
        )
    }

    fn set_leader(&self, leader: bool) {
        if let Some(health) = &self.health {
            health.metrics.set_leader(leader);
        }
    }

    /// Renew until the lease is lost, renewal errors, or shutdown.
    async fn renew_until_lost(&self, lease: &LeaseLock, shutdown: &CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.renew_interval) => {}
            }
            match lease.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    warn!(holder_id = %self.holder_id, "Lost leadership lease");
                    return;
                }
                Err(e) => {
                    warn!(holder_id = %self.holder_id, error = %e, "Failed to renew lease, relinquishing leadership");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Elector for LeaseElector {
    async fn run(
        &self,
        shutdown: CancellationToken,
        handler: Arc<dyn TermHandler>,
    ) -> crate::bootstrap::Result<()> {
        let lease = self.lease_lock();
        info!(
            holder_id = %self.holder_id,
            namespace = %self.namespace,
            lease_name = LEASE_NAME,
            "Starting leader election"
        );

        while !shutdown.is_cancelled() {
            // Standby: attempt to acquire.
            let acquired = match lease.try_acquire_or_renew().await {
                Ok(result) => result.acquired_lease,
                Err(e) => {
                    warn!(error = %e, "Failed to acquire lease, retrying");
                    false
                }
            };

            if acquired {
                info!(holder_id = %self.holder_id, "Acquired leadership");
                self.set_leader(true);

                // Term token: cancelled on loss AND on process shutdown.
                let term = shutdown.child_token();
                let term_task = {
                    let handler = handler.clone();
                    let term = term.clone();
                    tokio::spawn(async move { handler.on_acquired(term).await })
                };

                self.renew_until_lost(&lease, &shutdown).await;
                term.cancel();
                let _ = term_task.await;

                self.set_leader(false);
                info!(holder_id = %self.holder_id, "Leadership term over, returning to standby");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.renew_interval) => {}
            }
        }
        Ok(())
    }
}
