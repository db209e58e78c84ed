//! Default rule-evaluation engine: RFC 6902 payloads only.
//!
//! Applies each mutate rule's `patchesJson6902` document to the object.
//! Rules whose selector does not match the object are skipped; rules whose
//! payload fails to parse error; rules whose patch does not apply fail.
//! Richer evaluation strategies (overlays, expression languages) plug in
//! behind [`MutateEngine`](super::MutateEngine) without touching the
//! pipeline.

use async_trait::async_trait;
use json_patch::Patch;
use kube::ResourceExt;
use tracing::debug;

use super::{EngineResponse, MutateEngine, PolicyContext, RuleResponse};
use crate::crd::Rule;

/// Engine applying `patchesJson6902` rule payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonPatchEngine;

impl JsonPatchEngine {
    pub fn new() -> Self {
        Self
    }

    fn evaluate_rule(rule: &Rule, ctx: &PolicyContext, object: &mut serde_json::Value) -> RuleResponse {
        let namespace = ctx.resource().namespace();
        if !rule
            .match_resources
            .matches(ctx.resource_kind(), namespace.as_deref())
        {
            return RuleResponse::skip(&rule.name, "resource does not match rule");
        }

        let Some(mutate) = &rule.mutate else {
            return RuleResponse::skip(&rule.name, "rule has no mutate payload");
        };
        let Some(raw) = &mutate.patches_json6902 else {
            return RuleResponse::skip(&rule.name, "rule has no patchesJson6902 payload");
        };

        let patch: Patch = match serde_json::from_str(raw) {
            Ok(p) => p,
            Err(e) => {
                return RuleResponse::error(
                    &rule.name,
                    &format!("invalid patchesJson6902 document: {e}"),
                );
            }
        };

        // Apply against a scratch copy so a failed patch leaves the running
        // object untouched.
        let mut scratch = object.clone();
        if let Err(e) = json_patch::patch(&mut scratch, &patch.0) {
            return RuleResponse::fail(&rule.name, &format!("patch did not apply: {e}"));
        }
        *object = scratch;

        RuleResponse::pass(
            &rule.name,
            &format!("applied {} patch operations", patch.0.len()),
            patch.0,
        )
    }
}

#[async_trait]
impl MutateEngine for JsonPatchEngine {
    async fn mutate(&self, ctx: &PolicyContext) -> EngineResponse {
        let Some(policy) = ctx.policy().cloned() else {
            // Pipeline always attaches a policy before invoking the engine.
            return EngineResponse {
                policy: std::sync::Arc::new(crate::crd::ClusterPolicy::new(
                    "",
                    Default::default(),
                )),
                patched_resource: ctx.resource().clone(),
                rules: Vec::new(),
            };
        };

        let mut object = serde_json::to_value(ctx.resource()).unwrap_or_default();
        let mut rules = Vec::with_capacity(policy.spec.rules.len());
        for rule in &policy.spec.rules {
            let response = Self::evaluate_rule(rule, ctx, &mut object);
            debug!(
                policy = %policy.name_any(),
                rule = %rule.name,
                status = ?response.status,
                "Evaluated rule"
            );
            rules.push(response);
        }

        let patched_resource =
            serde_json::from_value(object).unwrap_or_else(|_| ctx.resource().clone());

        EngineResponse {
            policy,
            patched_resource,
            rules,
        }
    }
}
