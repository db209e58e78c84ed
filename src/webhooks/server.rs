//! Admission webhook server.
//!
//! Provides the HTTP endpoint for the Kubernetes mutating admission
//! webhook.
//!
//! To enable the webhook:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a MutatingWebhookConfiguration pointing at `/mutate`
//! 3. Mount the TLS certificate secret to the operator pod at /etc/webhook/certs/
//!
//! The webhook server starts automatically when certificates are present.

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

use crate::engine::PolicyContext;
use crate::health::HealthState;
use crate::store::PolicyStore;
use crate::webhooks::mutation::MutationHandler;

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

/// Shared state for webhook handlers
pub struct WebhookState {
    pub handler: MutationHandler,
    pub store: Arc<dyn PolicyStore>,
    pub health: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(
        handler: MutationHandler,
        store: Arc<dyn PolicyStore>,
        health: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            handler,
            store,
            health,
        }
    }
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason(
    request: &AdmissionRequest<DynamicObject>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    let full_message = format!("[{}] {}", reason, message);
    AdmissionResponse::from(request)
        .deny(full_message)
        .into_review()
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .with_state(state)
}

/// Mutating admission webhook handler
async fn mutate(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    let uid = &request.uid;
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // DELETE operations carry no object to mutate
    if request.operation == Operation::Delete {
        info!(uid = %uid, "Admission request allowed (DELETE)");
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    let Some(resource) = request.object.clone() else {
        error!(uid = %uid, "Missing object in request");
        return (
            StatusCode::OK,
            Json(deny_with_reason(
                &request,
                "Missing object in request",
                "InvalidRequest",
            )),
        );
    };

    let kind = request.kind.kind.clone();
    let policies = state
        .store
        .mutate_candidates(&kind, request.namespace.as_deref());
    let context = PolicyContext::new(resource, request.operation.clone(), request.dry_run);

    let start = Instant::now();
    let result = state
        .handler
        .handle_mutation(&request, &policies, context)
        .await;
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(mutation) => {
            if let Some(health) = &state.health {
                health.metrics.record_admission(&kind, true, elapsed);
            }
            let mut response = AdmissionResponse::from(&request);
            if !mutation.warnings.is_empty() {
                response.warnings = Some(mutation.warnings);
            }
            if let Some(patch) = mutation.patch {
                response = match response.with_patch(patch) {
                    Ok(patched) => patched,
                    Err(e) => {
                        error!(uid = %uid, error = %e, "Failed to serialize patch");
                        return (
                            StatusCode::OK,
                            Json(deny_with_reason(
                                &request,
                                "Failed to serialize mutation patch",
                                "InternalError",
                            )),
                        );
                    }
                };
                info!(uid = %uid, "Admission request mutated");
            } else {
                info!(uid = %uid, "Admission request allowed (no mutation)");
            }
            (StatusCode::OK, Json(response.into_review()))
        }
        Err(e) => {
            if let Some(health) = &state.health {
                health.metrics.record_admission(&kind, false, elapsed);
            }
            warn!(uid = %uid, error = %e, "Admission request denied");
            (
                StatusCode::OK,
                Json(deny_with_reason(&request, &e.to_string(), "MutationFailed")),
            )
        }
    }
}

/// Errors that can occur when running the webhook server
#[derive(Debug)]
pub enum WebhookError {
    /// TLS configuration error
    TlsConfig(String),
    /// Server error
    Server(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::TlsConfig(msg) => write!(f, "TLS configuration error: {}", msg),
            WebhookError::Server(msg) => write!(f, "Webhook server error: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves the /mutate endpoint. TLS certificates
/// are loaded from the paths specified.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(port = WEBHOOK_PORT, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
