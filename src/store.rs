//! Policy cache.
//!
//! The admission webhook reads candidate policies from a [`PolicyStore`].
//! In the binary the store is a reflector-backed view of ClusterPolicy
//! objects; tests use [`InMemoryPolicyStore`]. Candidate ordering is by
//! policy name, which keeps pipeline results deterministic. Fine-grained
//! rule-to-resource matching beyond the kind/namespace selector is the
//! admission-routing layer's concern.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use kube::runtime::reflector::Store;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bootstrap::{CacheSync, Controller, ControllerRunner};
use crate::crd::ClusterPolicy;

/// Read-only, internally synchronized policy lookup.
pub trait PolicyStore: Send + Sync {
    /// Ordered candidate policies with mutate rules for a (kind, namespace)
    /// pair.
    fn mutate_candidates(&self, kind: &str, namespace: Option<&str>) -> Vec<Arc<ClusterPolicy>>;

    /// All cached policies, in name order.
    fn all(&self) -> Vec<Arc<ClusterPolicy>>;
}

fn is_mutate_candidate(policy: &ClusterPolicy, kind: &str, namespace: Option<&str>) -> bool {
    policy
        .spec
        .rules
        .iter()
        .any(|r| r.mutate.is_some() && r.match_resources.matches(kind, namespace))
}

/// Policy store backed by a plain map. Used by tests and as a seed store
/// before a reflector is available.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<BTreeMap<String, Arc<ClusterPolicy>>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a policy.
    pub fn apply(&self, policy: ClusterPolicy) {
        let name = policy.name_any();
        if let Ok(mut policies) = self.policies.write() {
            policies.insert(name, Arc::new(policy));
        }
    }

    /// Remove a policy by name.
    pub fn delete(&self, name: &str) {
        if let Ok(mut policies) = self.policies.write() {
            policies.remove(name);
        }
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn mutate_candidates(&self, kind: &str, namespace: Option<&str>) -> Vec<Arc<ClusterPolicy>> {
        self.all()
            .into_iter()
            .filter(|p| is_mutate_candidate(p, kind, namespace))
            .collect()
    }

    fn all(&self) -> Vec<Arc<ClusterPolicy>> {
        self.policies
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Policy store reading from a reflector cache.
pub struct ReflectorPolicyStore {
    reader: Store<ClusterPolicy>,
}

impl PolicyStore for ReflectorPolicyStore {
    fn mutate_candidates(&self, kind: &str, namespace: Option<&str>) -> Vec<Arc<ClusterPolicy>> {
        self.all()
            .into_iter()
            .filter(|p| is_mutate_candidate(p, kind, namespace))
            .collect()
    }

    fn all(&self) -> Vec<Arc<ClusterPolicy>> {
        let mut policies = self.reader.state();
        policies.sort_by_key(|p| p.name_any());
        policies
    }
}

/// Readiness handle for the policy reflector.
pub struct PolicyCacheReadiness {
    reader: Store<ClusterPolicy>,
}

#[async_trait]
impl CacheSync for PolicyCacheReadiness {
    fn name(&self) -> &str {
        "clusterpolicies"
    }

    async fn wait_ready(&self, token: CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            ready = self.reader.wait_until_ready() => ready.is_ok(),
        }
    }
}

/// Always-on controller driving the policy watch stream into the reflector.
pub struct PolicyCacheController {
    stream: tokio::sync::Mutex<Option<BoxStream<'static, Result<ClusterPolicy, watcher::Error>>>>,
}

#[async_trait]
impl ControllerRunner for PolicyCacheController {
    async fn run(&self, token: CancellationToken, _workers: usize) {
        let Some(stream) = self.stream.lock().await.take() else {
            warn!("Policy cache stream already consumed");
            return;
        };
        let drive = stream.for_each(|event| async {
            match event {
                Ok(policy) => {
                    debug!(policy = %policy.name_any(), "Policy cache updated");
                }
                Err(e) => {
                    warn!(error = %e, "Policy watch error");
                }
            }
        });
        tokio::select! {
            _ = token.cancelled() => {}
            _ = drive => {
                error!("Policy watch stream ended unexpectedly");
            }
        }
    }
}

/// Create a filtered, reflector-backed stream for the policy watch.
///
/// The stream maintains the in-memory cache, retries with backoff on watch
/// errors, and filters out status-only updates via the generation predicate.
fn create_policy_stream(
    api: Api<ClusterPolicy>,
    watcher_config: WatcherConfig,
) -> (
    Store<ClusterPolicy>,
    impl Stream<Item = Result<ClusterPolicy, watcher::Error>>,
) {
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Build the reflector-backed policy cache: the store, the controller that
/// drives it, and its readiness gate.
pub fn policy_cache(client: Client) -> (Arc<ReflectorPolicyStore>, Controller, Arc<dyn CacheSync>) {
    let api: Api<ClusterPolicy> = Api::all(client);
    let watcher_config = WatcherConfig::default().any_semantic();
    let (reader, stream) = create_policy_stream(api, watcher_config);

    let store = Arc::new(ReflectorPolicyStore {
        reader: reader.clone(),
    });
    let readiness: Arc<dyn CacheSync> = Arc::new(PolicyCacheReadiness { reader });
    let controller = Controller::new(
        "policy-cache",
        1,
        Arc::new(PolicyCacheController {
            stream: tokio::sync::Mutex::new(Some(stream.boxed())),
        }),
    );
    (store, controller, readiness)
}
