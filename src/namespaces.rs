//! Namespace label lookup.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use tracing::warn;

use crate::engine::NamespaceLabelSource;

/// Label source reading namespaces through the API server.
pub struct ApiNamespaceLabels {
    api: Api<Namespace>,
}

impl ApiNamespaceLabels {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NamespaceLabelSource for ApiNamespaceLabels {
    async fn labels_for(&self, kind: &str, namespace: &str) -> BTreeMap<String, String> {
        match self.api.get(namespace).await {
            Ok(ns) => ns.metadata.labels.unwrap_or_default(),
            Err(e) => {
                warn!(kind = %kind, namespace = %namespace, error = %e, "Failed to look up namespace labels");
                BTreeMap::new()
            }
        }
    }
}
