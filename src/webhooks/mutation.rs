//! Admission-time mutation pipeline.
//!
//! Applies an ordered list of policies to one object, chaining the context
//! so each policy observes the object as mutated by its predecessors, and
//! produces a single composite patch. Failure semantics are all-or-nothing
//! across the policy set: any unsuccessful policy (or schema rejection)
//! aborts the run, discarding every fragment accumulated so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation};
use kube::ResourceExt;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use thiserror::Error;
use tracing::{debug, info};

use crate::crd::ClusterPolicy;
use crate::engine::{
    EngineResponse, MutateEngine, NamespaceLabelSource, PolicyContext, SchemaError,
    SchemaValidator,
};
use crate::events::{Event, EventEmitter, EventSubject};

/// Annotation recording which rules were applied, added as the final patch
/// fragment.
pub const LAST_APPLIED_ANNOTATION: &str = "policies.example.io/last-applied-patches";

/// A policy could not be applied to the request. Local to one admission
/// request; never fatal to the process.
#[derive(Debug, Error)]
pub enum PolicyApplicationError {
    /// The engine reported an unsuccessful response for a policy.
    #[error("failed to apply policy {policy} rules {rules:?}")]
    RulesFailed { policy: String, rules: Vec<String> },

    /// The mutated object was rejected by schema validation.
    #[error("failed to validate resource mutated by policy {policy}: {source}")]
    SchemaRejected {
        policy: String,
        #[source]
        source: SchemaError,
    },
}

/// The composite result of a successful pipeline run.
#[derive(Debug)]
pub struct MutationResult {
    /// The joined patch, or None when nothing mutated.
    pub patch: Option<Patch>,
    /// Human-readable warnings for rules that did not pass.
    pub warnings: Vec<String>,
}

/// Sequential, context-chained mutation pipeline.
pub struct MutationHandler {
    engine: Arc<dyn MutateEngine>,
    schema: Arc<dyn SchemaValidator>,
    ns_labels: Arc<dyn NamespaceLabelSource>,
    events: EventEmitter,
}

impl MutationHandler {
    pub fn new(
        engine: Arc<dyn MutateEngine>,
        schema: Arc<dyn SchemaValidator>,
        ns_labels: Arc<dyn NamespaceLabelSource>,
        events: EventEmitter,
    ) -> Self {
        Self {
            engine,
            schema,
            ns_labels,
            events,
        }
    }

    /// Evaluate the candidate policies against the request.
    ///
    /// Returns the joined patch plus warnings, or an error with no partial
    /// patch leakage.
    pub async fn handle_mutation(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        policies: &[Arc<ClusterPolicy>],
        context: PolicyContext,
    ) -> Result<MutationResult, PolicyApplicationError> {
        let (patch, responses) = self.apply_mutations(request, policies, context).await?;
        let warnings = responses.iter().flat_map(|r| r.warnings()).collect();
        Ok(MutationResult { patch, warnings })
    }

    /// Run the pipeline: one engine invocation per mutate policy, in order,
    /// accumulating fragments locally and committing only on full success.
    async fn apply_mutations(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        policies: &[Arc<ClusterPolicy>],
        context: PolicyContext,
    ) -> Result<(Option<Patch>, Vec<EngineResponse>), PolicyApplicationError> {
        // True no-op: nothing in the list can mutate.
        if !policies.iter().any(|p| p.spec.has_mutate()) {
            return Ok((None, Vec::new()));
        }

        let mut fragments: Vec<PatchOperation> = Vec::new();
        let mut responses: Vec<EngineResponse> = Vec::new();
        let mut running = context;

        for policy in policies {
            if !policy.spec.has_mutate() {
                continue;
            }
            debug!(policy = %policy.name_any(), "Applying policy mutate rules");

            // Derive from the running context: policy i observes the object
            // as mutated by policies 0..i-1.
            let current = running.with_policy(policy.clone());
            let response = self.apply_policy(request, &current).await?;

            let patches = response.patches();
            if !patches.is_empty() {
                let rules: Vec<&str> = response
                    .applied_rules()
                    .iter()
                    .map(|r| r.name.as_str())
                    .collect();
                info!(
                    policy = %policy.name_any(),
                    rules = ?rules,
                    "Mutation rules from policy applied successfully"
                );
                fragments.extend(patches);
            }

            running = current.with_resource(response.patched_resource.clone());
            responses.push(response);
        }

        if !fragments.is_empty()
            && let Some(annotation) = annotation_fragment(&responses)
        {
            fragments.push(annotation);
        }

        // Events only for runs that completed without error.
        for event in events_for(&responses) {
            self.events.emit(event);
        }

        let patch = if fragments.is_empty() {
            None
        } else {
            Some(Patch(fragments))
        };
        Ok((patch, responses))
    }

    /// Evaluate one policy: namespace-label injection, engine invocation,
    /// fail-fast on unsuccessful responses, optional schema gate.
    async fn apply_policy(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        context: &PolicyContext,
    ) -> Result<EngineResponse, PolicyApplicationError> {
        let namespace = request.namespace.as_deref().filter(|ns| !ns.is_empty());
        let context = match namespace {
            Some(ns) if request.kind.kind != "Namespace" => {
                let labels = self.ns_labels.labels_for(&request.kind.kind, ns).await;
                context.with_namespace_labels(labels)
            }
            // Cluster-scoped or namespace-kind requests skip injection.
            _ => context.clone(),
        };

        let response = self.engine.mutate(&context).await;

        if !response.is_successful() {
            return Err(PolicyApplicationError::RulesFailed {
                policy: response.policy_name(),
                rules: response.failed_rules(),
            });
        }

        let validate = context
            .policy()
            .map(|p| p.spec.validate_schema)
            .unwrap_or(false);
        if validate && response.patched_kind() != "*" {
            self.schema
                .validate_resource(
                    &response.patched_resource,
                    response.patched_api_version(),
                    response.patched_kind(),
                )
                .await
                .map_err(|source| PolicyApplicationError::SchemaRejected {
                    policy: response.policy_name(),
                    source,
                })?;
        }

        Ok(response)
    }
}

/// Build the trailing annotation fragment recording applied rules.
///
/// Adds the annotation key directly when the mutated object already carries
/// annotations; otherwise adds the whole `/metadata/annotations` container.
fn annotation_fragment(responses: &[EngineResponse]) -> Option<PatchOperation> {
    let mut applied = BTreeMap::new();
    for response in responses {
        for rule in response.applied_rules() {
            applied.insert(
                format!("{}.{}", rule.name, response.policy_name()),
                rule.message.clone(),
            );
        }
    }
    if applied.is_empty() {
        return None;
    }
    let value = serde_json::to_string(&applied).ok()?;

    let has_annotations = responses
        .last()
        .map(|r| r.patched_resource.metadata.annotations.is_some())
        .unwrap_or(false);

    let op = if has_annotations {
        AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations", LAST_APPLIED_ANNOTATION]),
            value: serde_json::Value::String(value),
        }
    } else {
        AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations"]),
            value: serde_json::json!({ LAST_APPLIED_ANNOTATION: value }),
        }
    };
    Some(PatchOperation::Add(op))
}

/// One event per triggered policy, describing its effect on the request.
fn events_for(responses: &[EngineResponse]) -> Vec<Event> {
    responses
        .iter()
        .map(|response| {
            let subject = EventSubject::for_resource(&response.patched_resource);
            if response.is_successful() {
                let rules: Vec<String> = response
                    .applied_rules()
                    .iter()
                    .map(|r| r.name.clone())
                    .collect();
                Event::policy_applied(subject, &response.policy_name(), &rules)
            } else {
                Event::policy_failed(
                    subject,
                    &response.policy_name(),
                    &response.failed_rules().join("; "),
                )
            }
        })
        .collect()
}
