//! Test fixtures and mock collaborators for the mutation pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde_json::json;

use policy_operator::crd::{ClusterPolicy, ClusterPolicySpec, MatchResources, MutateRule, Rule};
use policy_operator::engine::{
    EngineResponse, MutateEngine, NamespaceLabelSource, PolicyContext, RuleResponse, SchemaError,
    SchemaValidator,
};
use policy_operator::events::{Event, EventSink};

/// Builder for ClusterPolicy test fixtures.
#[derive(Clone, Debug)]
pub struct ClusterPolicyBuilder {
    name: String,
    rules: Vec<Rule>,
    validate_schema: bool,
}

impl ClusterPolicyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            validate_schema: true,
        }
    }

    /// Add a rule with a mutate payload matching the given kinds.
    pub fn mutate_rule(mut self, rule_name: &str, kinds: &[&str]) -> Self {
        self.rules.push(Rule {
            name: rule_name.to_string(),
            match_resources: MatchResources {
                kinds: kinds.iter().map(|k| k.to_string()).collect(),
                namespaces: Vec::new(),
            },
            mutate: Some(MutateRule::default()),
        });
        self
    }

    /// Add a rule without a mutate payload.
    pub fn audit_rule(mut self, rule_name: &str) -> Self {
        self.rules.push(Rule {
            name: rule_name.to_string(),
            match_resources: MatchResources::default(),
            mutate: None,
        });
        self
    }

    pub fn validate_schema(mut self, validate: bool) -> Self {
        self.validate_schema = validate;
        self
    }

    pub fn build(self) -> Arc<ClusterPolicy> {
        let mut policy = ClusterPolicy::new(
            &self.name,
            ClusterPolicySpec {
                rules: self.rules,
                validate_schema: self.validate_schema,
                failure_policy: Default::default(),
            },
        );
        policy.metadata.name = Some(self.name);
        Arc::new(policy)
    }
}

/// A pod-shaped DynamicObject.
pub fn pod(namespace: &str, name: &str) -> DynamicObject {
    let value = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"containers": [{"name": "app", "image": "nginx"}]}
    });
    serde_json::from_value(value).unwrap()
}

/// An admission request for the given object.
pub fn admission_request(
    kind: &str,
    namespace: Option<&str>,
    object: &DynamicObject,
) -> AdmissionRequest<DynamicObject> {
    let mut request = json!({
        "uid": "test-uid",
        "kind": {"group": "", "version": "v1", "kind": kind},
        "resource": {"group": "", "version": "v1", "resource": format!("{}s", kind.to_lowercase())},
        "name": object.metadata.name.clone().unwrap_or_default(),
        "operation": "CREATE",
        "userInfo": {"username": "tester"},
        "object": serde_json::to_value(object).unwrap(),
        "dryRun": false
    });
    if let Some(ns) = namespace {
        request["namespace"] = json!(ns);
    }
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": request
    }))
    .unwrap();
    review.try_into().unwrap()
}

/// A base pipeline context for the request's object.
pub fn base_context(request: &AdmissionRequest<DynamicObject>) -> PolicyContext {
    PolicyContext::new(
        request.object.clone().expect("request carries an object"),
        request.operation.clone(),
        request.dry_run,
    )
}

/// Shorthand for an RFC 6902 add operation.
pub fn add_op(tokens: &[&str], value: serde_json::Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(tokens.iter().copied()),
        value,
    })
}

/// Scripted engine behavior for one policy.
#[derive(Clone)]
pub enum Behavior {
    /// Apply the given (rule name, patch) pairs in order.
    ApplyRules(Vec<(String, Patch)>),
    /// Report a failed rule.
    FailRule { rule: String, message: String },
    /// All rules skip.
    SkipAll,
}

/// Mock engine that records every invocation and the object snapshot it
/// observed, then replays the scripted behavior for the active policy.
#[derive(Default)]
pub struct MockEngine {
    behaviors: HashMap<String, Behavior>,
    pub calls: Mutex<Vec<String>>,
    pub observed: Mutex<Vec<serde_json::Value>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn behavior(mut self, policy: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(policy.to_string(), behavior);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MutateEngine for MockEngine {
    async fn mutate(&self, ctx: &PolicyContext) -> EngineResponse {
        let policy = ctx.policy().cloned().expect("pipeline attaches a policy");
        let name = ctx.policy_name();
        let object = serde_json::to_value(ctx.resource()).unwrap();
        self.calls.lock().unwrap().push(name.clone());
        self.observed.lock().unwrap().push(object.clone());

        match self.behaviors.get(&name) {
            Some(Behavior::ApplyRules(rules)) => {
                let mut running = object;
                let mut responses = Vec::new();
                for (rule, patch) in rules {
                    json_patch::patch(&mut running, &patch.0).unwrap();
                    responses.push(RuleResponse::pass(rule, "applied", patch.0.clone()));
                }
                EngineResponse {
                    policy,
                    patched_resource: serde_json::from_value(running).unwrap(),
                    rules: responses,
                }
            }
            Some(Behavior::FailRule { rule, message }) => EngineResponse {
                policy,
                patched_resource: ctx.resource().clone(),
                rules: vec![RuleResponse::fail(rule, message)],
            },
            Some(Behavior::SkipAll) | None => EngineResponse {
                policy,
                patched_resource: ctx.resource().clone(),
                rules: vec![RuleResponse::skip("skip", "no behavior scripted")],
            },
        }
    }
}

/// Namespace label source that counts lookups.
#[derive(Default)]
pub struct CountingLabels {
    pub labels: BTreeMap<String, String>,
    pub lookups: Mutex<Vec<(String, String)>>,
}

impl CountingLabels {
    pub fn with_label(key: &str, value: &str) -> Self {
        Self {
            labels: BTreeMap::from([(key.to_string(), value.to_string())]),
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().unwrap().len()
    }
}

#[async_trait]
impl NamespaceLabelSource for CountingLabels {
    async fn labels_for(&self, kind: &str, namespace: &str) -> BTreeMap<String, String> {
        self.lookups
            .lock()
            .unwrap()
            .push((kind.to_string(), namespace.to_string()));
        self.labels.clone()
    }
}

/// Schema validator that counts calls and can be scripted to reject.
#[derive(Default)]
pub struct RecordingValidator {
    pub reject_with: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingValidator {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            reject_with: Some(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SchemaValidator for RecordingValidator {
    async fn validate_resource(
        &self,
        _object: &DynamicObject,
        _api_version: &str,
        kind: &str,
    ) -> Result<(), SchemaError> {
        self.calls.lock().unwrap().push(kind.to_string());
        match &self.reject_with {
            Some(message) => Err(SchemaError(message.clone())),
            None => Ok(()),
        }
    }
}

/// Event sink that records everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: Event) {
        self.events.lock().await.push(event);
    }
}
