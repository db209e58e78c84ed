//! ClusterPolicy Custom Resource Definition.
//!
//! A ClusterPolicy holds an ordered list of rules. Rules carrying a `mutate`
//! payload are applied by the admission webhook; the policy as a whole can
//! opt out of post-mutation schema validation via `validateSchema`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ClusterPolicy is a cluster-scoped custom resource describing mutations
/// applied to objects at admission time.
///
/// Example:
/// ```yaml
/// apiVersion: policies.example.io/v1alpha1
/// kind: ClusterPolicy
/// metadata:
///   name: add-team-label
/// spec:
///   validateSchema: true
///   rules:
///     - name: add-label
///       match:
///         kinds: ["Pod"]
///       mutate:
///         patchesJson6902: |
///           [{"op": "add", "path": "/metadata/labels/team", "value": "infra"}]
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policies.example.io",
    version = "v1alpha1",
    kind = "ClusterPolicy",
    plural = "clusterpolicies",
    shortname = "cpol",
    status = "ClusterPolicyStatus",
    // Print columns for kubectl get
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Rules", "type":"integer", "jsonPath":".status.ruleCount"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    /// Ordered list of rules. Rule order is significant: mutations are
    /// applied in list order and later rules observe earlier results.
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Validate the mutated object against the API schema before admitting
    /// it (default true).
    #[serde(default = "default_validate_schema")]
    pub validate_schema: bool,

    /// How the admission webhook treats evaluation failures for this policy.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl ClusterPolicySpec {
    /// Whether any rule in this policy carries a mutate payload.
    pub fn has_mutate(&self) -> bool {
        self.rules.iter().any(|r| r.mutate.is_some())
    }

    /// Rules carrying a mutate payload, in list order.
    pub fn mutate_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.mutate.is_some())
    }
}

impl Default for ClusterPolicySpec {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            validate_schema: default_validate_schema(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_validate_schema() -> bool {
    true
}

/// Failure handling mode for a policy.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Reject the admission request when the policy cannot be applied.
    #[default]
    Fail,
    /// Admit the request unpatched when the policy cannot be applied.
    Ignore,
}

/// A single named rule within a policy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule name, unique within the policy.
    pub name: String,

    /// Resource kinds this rule applies to.
    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,

    /// Mutation payload. Rules without one are ignored by the mutation
    /// pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutate: Option<MutateRule>,
}

/// Resource selection for a rule.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchResources {
    /// Kinds to match. `*` matches any kind. Empty matches nothing.
    #[serde(default)]
    pub kinds: Vec<String>,

    /// Namespaces to match. Empty matches all namespaces.
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl MatchResources {
    /// Whether this selector matches the given kind/namespace pair.
    pub fn matches(&self, kind: &str, namespace: Option<&str>) -> bool {
        let kind_ok = self.kinds.iter().any(|k| k == "*" || k == kind);
        let ns_ok = self.namespaces.is_empty()
            || namespace.is_some_and(|ns| self.namespaces.iter().any(|n| n == ns));
        kind_ok && ns_ok
    }
}

/// Mutation payload of a rule.
///
/// The rule-evaluation engine decides how to interpret these fields; the
/// pipeline only cares whether a payload is present.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MutateRule {
    /// RFC 6902 patch operations, as a YAML/JSON document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches_json6902: Option<String>,

    /// Strategic-merge-style overlay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_strategic_merge: Option<Value>,
}

/// Status subresource for ClusterPolicy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicyStatus {
    /// Whether the policy is ready to be served to the admission webhook.
    #[serde(default)]
    pub ready: bool,

    /// Total number of rules.
    #[serde(default)]
    pub rule_count: i32,

    /// Number of rules with a mutate payload.
    #[serde(default)]
    pub mutate_rule_count: i32,

    /// Status conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation most recently observed by the status controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// A status condition in the Kubernetes convention.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Ready").
    pub r#type: String,
    /// "True" or "False".
    pub status: String,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// Generation the condition was computed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Build a Ready condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self {
            r#type: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: generation,
        }
    }
}
