//! policy-operator - a Kubernetes admission policy engine.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Starts the always-on controllers (health server, event drain, policy cache)
//! - Gates the policy cache on informer sync before serving
//! - Runs leader election and starts the leader-only controllers per term
//! - Starts the mutating webhook server when certificates are present

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use policy_operator::bootstrap::{
    Controller, Elector, LeaderGate, LeaderTerm, LeaderTermFactory, wait_for_cache_sync,
};
use policy_operator::controller::status::{DEFAULT_RESYNC_INTERVAL, PolicyStatusController};
use policy_operator::engine::{BasicSchemaValidator, JsonPatchEngine};
use policy_operator::events::{
    DEFAULT_MAX_QUEUED_EVENTS, EventDrainController, EventQueue, RecorderSink,
};
use policy_operator::health::{HealthState, run_health_server};
use policy_operator::leader::LeaseElector;
use policy_operator::namespaces::ApiNamespaceLabels;
use policy_operator::store;
use policy_operator::webhooks::{
    MutationHandler, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookState, run_webhook_server,
};

/// Deadline for informer caches to become ready; missing it is fatal
const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(120);
/// Default number of event drain workers
const DEFAULT_EVENT_WORKERS: usize = 3;
/// Default number of workers for leader-only controllers
const DEFAULT_GEN_WORKERS: usize = 10;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Builds the leader-only controller set. Each leadership term gets a fresh
/// policy cache and a fresh status controller reading from it.
struct LeaderControllers {
    client: Client,
    gen_workers: usize,
}

#[async_trait]
impl LeaderTermFactory for LeaderControllers {
    async fn build(&self) -> policy_operator::bootstrap::Result<LeaderTerm> {
        let (store, cache_controller, readiness) = store::policy_cache(self.client.clone());
        let status_controller = Controller::new(
            "policy-status-controller",
            self.gen_workers,
            Arc::new(PolicyStatusController::new(
                self.client.clone(),
                store,
                DEFAULT_RESYNC_INTERVAL,
            )),
        );
        Ok(LeaderTerm {
            caches: vec![readiness],
            controllers: vec![cache_controller, status_controller],
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("policy_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting policy-operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Tunables
    let event_workers = env_usize("POLICY_WORKERS", DEFAULT_EVENT_WORKERS);
    let max_queued_events = env_usize("MAX_QUEUED_EVENTS", DEFAULT_MAX_QUEUED_EVENTS);
    let gen_workers = env_usize("GEN_WORKERS", DEFAULT_GEN_WORKERS);

    // Get pod identity for leader election
    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Process-wide cancellation, triggered by SIGTERM/SIGINT
    let shutdown = CancellationToken::new();
    let signal_handle = {
        let shutdown = shutdown.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Received shutdown signal, initiating graceful shutdown");
            health_state.set_ready(false).await;
            shutdown.cancel();
        })
    };

    // Event queue: producers never block, the drain runs as an always-on
    // controller
    let (emitter, drain) = EventQueue::bounded(max_queued_events, Some(health_state.clone()));
    let event_controller = Controller::new(
        "event-generator",
        event_workers,
        Arc::new(EventDrainController::new(
            drain,
            Arc::new(RecorderSink::new(client.clone())),
        )),
    );

    // Policy cache serving the admission webhook
    let (policy_store, policy_cache_controller, policy_cache_ready) =
        store::policy_cache(client.clone());

    // Start always-on controllers
    let mut always_on = JoinSet::new();
    event_controller.spawn(shutdown.clone(), &mut always_on);
    policy_cache_controller.spawn(shutdown.clone(), &mut always_on);

    // No controller processes events until its caches are synced
    if let Err(e) =
        wait_for_cache_sync(&shutdown, CACHE_SYNC_TIMEOUT, &[policy_cache_ready]).await
    {
        error!(error = %e, "Failed to wait for cache sync");
        std::process::exit(1);
    }
    health_state.set_ready(true).await;

    // Optionally start webhook server if certificates are available
    let webhook_handle = if Path::new(WEBHOOK_CERT_PATH).exists()
        && Path::new(WEBHOOK_KEY_PATH).exists()
    {
        info!("TLS certificates found, starting webhook server");
        let handler = MutationHandler::new(
            Arc::new(JsonPatchEngine::new()),
            Arc::new(BasicSchemaValidator::new()),
            Arc::new(ApiNamespaceLabels::new(client.clone())),
            emitter.clone(),
        );
        let state = Arc::new(WebhookState::new(
            handler,
            policy_store.clone(),
            Some(health_state.clone()),
        ));
        Some(tokio::spawn(async move {
            if let Err(e) = run_webhook_server(state, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH).await {
                error!("Webhook server error: {}", e);
            }
        }))
    } else {
        info!("Webhook certificates not found, webhook server disabled");
        None
    };

    // Leader election gates the leader-only controllers; every acquisition
    // builds a fresh term
    let gate = Arc::new(LeaderGate::new(
        Arc::new(LeaderControllers {
            client: client.clone(),
            gen_workers,
        }),
        CACHE_SYNC_TIMEOUT,
        shutdown.clone(),
    ));
    let elector = LeaseElector::new(client, namespace, pod_name, Some(health_state.clone()));
    if let Err(e) = elector.run(shutdown.clone(), gate.clone()).await {
        error!(error = %e, "Failed to run leader election");
        std::process::exit(1);
    }

    // Wait for always-on controllers to observe cancellation and return
    while always_on.join_next().await.is_some() {}

    if let Some(e) = gate.take_fatal() {
        error!(error = %e, "Exiting after fatal leadership-term error");
        std::process::exit(1);
    }

    signal_handle.abort();
    health_handle.abort();
    if let Some(handle) = webhook_handle {
        handle.abort();
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut
/// down gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
