//! Per-policy evaluation outcomes.

use std::sync::Arc;

use json_patch::PatchOperation;
use kube::ResourceExt;
use kube::core::DynamicObject;

use crate::crd::ClusterPolicy;

/// Outcome of evaluating a single rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleStatus {
    /// Rule applied successfully.
    Pass,
    /// Rule matched but its mutation failed.
    Fail,
    /// Rule did not apply to this object.
    Skip,
    /// Rule evaluation itself errored.
    Error,
}

/// Outcome record for a single rule.
#[derive(Clone, Debug)]
pub struct RuleResponse {
    pub name: String,
    pub status: RuleStatus,
    pub message: String,
    /// Patch fragments contributed by this rule, in application order.
    pub patches: Vec<PatchOperation>,
}

impl RuleResponse {
    pub fn pass(name: &str, message: &str, patches: Vec<PatchOperation>) -> Self {
        Self {
            name: name.to_string(),
            status: RuleStatus::Pass,
            message: message.to_string(),
            patches,
        }
    }

    pub fn fail(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: RuleStatus::Fail,
            message: message.to_string(),
            patches: Vec::new(),
        }
    }

    pub fn skip(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: RuleStatus::Skip,
            message: message.to_string(),
            patches: Vec::new(),
        }
    }

    pub fn error(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: RuleStatus::Error,
            message: message.to_string(),
            patches: Vec::new(),
        }
    }
}

/// Outcome of evaluating one policy against one object.
#[derive(Clone, Debug)]
pub struct EngineResponse {
    /// The policy that produced this response.
    pub policy: Arc<ClusterPolicy>,
    /// Object snapshot after applying this policy's successful rules.
    pub patched_resource: DynamicObject,
    /// Per-rule outcomes, in rule order.
    pub rules: Vec<RuleResponse>,
}

impl EngineResponse {
    /// A response is successful when no rule failed or errored. Skipped
    /// rules do not count against success.
    pub fn is_successful(&self) -> bool {
        !self
            .rules
            .iter()
            .any(|r| matches!(r.status, RuleStatus::Fail | RuleStatus::Error))
    }

    /// Patch fragments from passing rules, in rule order.
    ///
    /// Unsuccessful responses must not contribute patches; callers enforce
    /// that by aborting before reading them.
    pub fn patches(&self) -> Vec<PatchOperation> {
        self.rules
            .iter()
            .filter(|r| r.status == RuleStatus::Pass)
            .flat_map(|r| r.patches.iter().cloned())
            .collect()
    }

    /// Names of rules that passed and contributed at least one patch.
    pub fn applied_rules(&self) -> Vec<&RuleResponse> {
        self.rules
            .iter()
            .filter(|r| r.status == RuleStatus::Pass && !r.patches.is_empty())
            .collect()
    }

    /// "name: message" strings for failed/errored rules.
    pub fn failed_rules(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| matches!(r.status, RuleStatus::Fail | RuleStatus::Error))
            .map(|r| format!("{}: {}", r.name, r.message))
            .collect()
    }

    /// Human-readable warnings for rules that did not pass.
    pub fn warnings(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| r.status != RuleStatus::Pass)
            .map(|r| {
                format!(
                    "policy {} rule {} {}: {}",
                    self.policy_name(),
                    r.name,
                    match r.status {
                        RuleStatus::Fail => "failed",
                        RuleStatus::Skip => "skipped",
                        RuleStatus::Error => "errored",
                        RuleStatus::Pass => "passed",
                    },
                    r.message
                )
            })
            .collect()
    }

    /// Name of the policy that produced this response.
    pub fn policy_name(&self) -> String {
        self.policy.name_any()
    }

    /// Kind of the patched object, if typed.
    pub fn patched_kind(&self) -> &str {
        self.patched_resource
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or("")
    }

    /// API version of the patched object, if typed.
    pub fn patched_api_version(&self) -> &str {
        self.patched_resource
            .types
            .as_ref()
            .map(|t| t.api_version.as_str())
            .unwrap_or("")
    }
}
