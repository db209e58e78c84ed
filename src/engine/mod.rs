//! Policy evaluation seam.
//!
//! The mutation pipeline talks to three collaborators through the traits
//! defined here: the rule-evaluation engine, the schema validator, and the
//! namespace label source. Rule evaluation internals live behind
//! [`MutateEngine`]; the pipeline only consumes [`EngineResponse`] values.

mod context;
mod json6902;
mod response;
mod schema;

pub use context::PolicyContext;
pub use json6902::JsonPatchEngine;
pub use response::{EngineResponse, RuleResponse, RuleStatus};
pub use schema::BasicSchemaValidator;

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::core::DynamicObject;
use thiserror::Error;

/// Rule-evaluation engine facade. Invoked once per policy with a context
/// carrying that policy and the current object snapshot.
#[async_trait]
pub trait MutateEngine: Send + Sync {
    /// Evaluate the active policy's mutate rules against the context's
    /// object and return the outcome.
    async fn mutate(&self, ctx: &PolicyContext) -> EngineResponse;
}

/// A schema violation reported by the validator.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SchemaError(pub String);

/// Validates a mutated object against the API schema for its kind.
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    async fn validate_resource(
        &self,
        object: &DynamicObject,
        api_version: &str,
        kind: &str,
    ) -> Result<(), SchemaError>;
}

/// Resolves the labels of a namespace, typically from a synced cache.
#[async_trait]
pub trait NamespaceLabelSource: Send + Sync {
    async fn labels_for(&self, kind: &str, namespace: &str) -> BTreeMap<String, String>;
}
