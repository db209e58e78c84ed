//! Policy status controller.
//!
//! Periodically scans the policy cache and reconciles each policy's status
//! subresource: rule counts and a Ready condition. A scan loop feeds a
//! work channel drained by the configured number of workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bootstrap::ControllerRunner;
use crate::crd::{ClusterPolicy, ClusterPolicyStatus, Condition};
use crate::store::PolicyStore;

/// Field manager name for status patches
pub const FIELD_MANAGER: &str = "policy-operator";

/// Default interval between status scans
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Leader-only controller keeping ClusterPolicy status current.
pub struct PolicyStatusController {
    client: Client,
    store: Arc<dyn PolicyStore>,
    resync: Duration,
}

impl PolicyStatusController {
    pub fn new(client: Client, store: Arc<dyn PolicyStore>, resync: Duration) -> Self {
        Self {
            client,
            store,
            resync,
        }
    }
}

/// Compute the desired status for a policy.
pub fn desired_status(policy: &ClusterPolicy) -> ClusterPolicyStatus {
    let rule_count = policy.spec.rules.len() as i32;
    let mutate_rule_count = policy.spec.mutate_rules().count() as i32;
    let generation = policy.metadata.generation;
    let ready = rule_count > 0;
    let condition = if ready {
        Condition::ready(
            true,
            "RulesLoaded",
            &format!("{rule_count} rules loaded, {mutate_rule_count} with mutate payloads"),
            generation,
        )
    } else {
        Condition::ready(false, "NoRules", "policy has no rules", generation)
    };
    ClusterPolicyStatus {
        ready,
        rule_count,
        mutate_rule_count,
        conditions: vec![condition],
        observed_generation: generation,
    }
}

async fn sync_status(api: &Api<ClusterPolicy>, policy: &ClusterPolicy) -> Result<(), kube::Error> {
    let desired = desired_status(policy);
    if policy.status.as_ref() == Some(&desired) {
        return Ok(());
    }
    let name = policy.name_any();
    debug!(policy = %name, ready = desired.ready, "Updating policy status");
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(serde_json::json!({ "status": desired })),
    )
    .await?;
    Ok(())
}

#[async_trait]
impl ControllerRunner for PolicyStatusController {
    async fn run(&self, token: CancellationToken, workers: usize) {
        let api: Api<ClusterPolicy> = Api::all(self.client.clone());
        let (tx, rx) = mpsc::channel::<Arc<ClusterPolicy>>(64);
        let rx = Arc::new(Mutex::new(rx));

        let mut tasks = JoinSet::new();
        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            let api = api.clone();
            let token = token.clone();
            tasks.spawn(async move {
                loop {
                    let policy = tokio::select! {
                        _ = token.cancelled() => break,
                        policy = async { rx.lock().await.recv().await } => policy,
                    };
                    match policy {
                        Some(policy) => {
                            if let Err(e) = sync_status(&api, &policy).await {
                                warn!(policy = %policy.name_any(), error = %e, "Failed to update policy status");
                            }
                        }
                        None => break,
                    }
                }
            });
        }

        let mut ticker = tokio::time::interval(self.resync);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    for policy in self.store.all() {
                        if tx.send(policy).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        drop(tx);
        while tasks.join_next().await.is_some() {}
    }
}
