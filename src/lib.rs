//! policy-operator library crate
//!
//! An admission policy engine: a mutating webhook applies ClusterPolicy
//! rules to incoming objects, and a leader-gated set of background
//! controllers keeps policy state reconciled.

pub mod bootstrap;
pub mod controller;
pub mod crd;
pub mod engine;
pub mod events;
pub mod health;
pub mod leader;
pub mod namespaces;
pub mod store;
pub mod webhooks;

pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};
