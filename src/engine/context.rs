//! Evaluation context for one (request, policy) pair.
//!
//! `PolicyContext` is an immutable-update value type: every `with_*` method
//! returns a new context and leaves the receiver untouched. Concurrent
//! admission requests therefore never observe each other's intermediate
//! state, and no locking is needed inside the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use kube::core::DynamicObject;
use kube::core::admission::Operation;

use crate::crd::ClusterPolicy;

/// Evaluation state for one (request, policy) pair.
#[derive(Clone, Debug)]
pub struct PolicyContext {
    resource: DynamicObject,
    policy: Option<Arc<ClusterPolicy>>,
    namespace_labels: BTreeMap<String, String>,
    operation: Operation,
    dry_run: bool,
}

impl PolicyContext {
    /// Create a base context for an admission request.
    pub fn new(resource: DynamicObject, operation: Operation, dry_run: bool) -> Self {
        Self {
            resource,
            policy: None,
            namespace_labels: BTreeMap::new(),
            operation,
            dry_run,
        }
    }

    /// Derive a context with the given policy active.
    pub fn with_policy(&self, policy: Arc<ClusterPolicy>) -> Self {
        let mut next = self.clone();
        next.policy = Some(policy);
        next
    }

    /// Derive a context with a new object snapshot (e.g. after a mutation).
    pub fn with_resource(&self, resource: DynamicObject) -> Self {
        let mut next = self.clone();
        next.resource = resource;
        next
    }

    /// Derive a context with the namespace label cache populated.
    pub fn with_namespace_labels(&self, labels: BTreeMap<String, String>) -> Self {
        let mut next = self.clone();
        next.namespace_labels = labels;
        next
    }

    /// The object under evaluation.
    pub fn resource(&self) -> &DynamicObject {
        &self.resource
    }

    /// Kind of the object under evaluation, if typed.
    pub fn resource_kind(&self) -> &str {
        self.resource
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or("")
    }

    /// The currently active policy, if one has been attached.
    pub fn policy(&self) -> Option<&Arc<ClusterPolicy>> {
        self.policy.as_ref()
    }

    /// Name of the active policy, or empty string if none.
    pub fn policy_name(&self) -> String {
        self.policy.as_ref().map(|p| p.name_any()).unwrap_or_default()
    }

    /// Cached labels of the request's namespace.
    pub fn namespace_labels(&self) -> &BTreeMap<String, String> {
        &self.namespace_labels
    }

    /// The admission operation being evaluated.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Whether the request is a dry run.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}
