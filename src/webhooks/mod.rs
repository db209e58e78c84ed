//! Mutating admission webhook.
//!
//! `mutation` holds the policy pipeline; `server` exposes it over TLS as a
//! Kubernetes MutatingWebhookConfiguration endpoint.

pub mod mutation;
mod server;

pub use mutation::{LAST_APPLIED_ANNOTATION, MutationHandler, MutationResult, PolicyApplicationError};
pub use server::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    create_webhook_router, run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
