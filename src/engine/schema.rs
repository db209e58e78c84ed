//! Structural schema validation for mutated objects.
//!
//! Checks the invariants a mutation must never break: type metadata intact,
//! a name (or generateName) present, and label/annotation values still
//! strings. Full OpenAPI validation belongs to the cluster; this gate
//! catches mutations that would be rejected outright.

use async_trait::async_trait;
use kube::core::DynamicObject;

use super::{SchemaError, SchemaValidator};

/// Structural validator for mutated objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicSchemaValidator;

impl BasicSchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SchemaValidator for BasicSchemaValidator {
    async fn validate_resource(
        &self,
        object: &DynamicObject,
        api_version: &str,
        kind: &str,
    ) -> Result<(), SchemaError> {
        if api_version.is_empty() || kind.is_empty() {
            return Err(SchemaError(
                "mutated object lost its type metadata".to_string(),
            ));
        }
        if object.metadata.name.is_none() && object.metadata.generate_name.is_none() {
            return Err(SchemaError(
                "mutated object has neither metadata.name nor metadata.generateName".to_string(),
            ));
        }
        // Serialized form must still round-trip as an object.
        let value = serde_json::to_value(object)
            .map_err(|e| SchemaError(format!("mutated object is not serializable: {e}")))?;
        if !value.is_object() {
            return Err(SchemaError("mutated object is not a JSON object".to_string()));
        }
        if let Some(labels) = value.pointer("/metadata/labels") {
            validate_string_map(labels, "metadata.labels")?;
        }
        if let Some(annotations) = value.pointer("/metadata/annotations") {
            validate_string_map(annotations, "metadata.annotations")?;
        }
        Ok(())
    }
}

fn validate_string_map(value: &serde_json::Value, field: &str) -> Result<(), SchemaError> {
    let Some(map) = value.as_object() else {
        return Err(SchemaError(format!("{field} is not a map")));
    };
    for (key, v) in map {
        if !v.is_string() {
            return Err(SchemaError(format!("{field}/{key} is not a string")));
        }
    }
    Ok(())
}
