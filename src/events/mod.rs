//! Decoupled event emission.
//!
//! The admission path and the background controllers enqueue outcome events
//! here; a fixed pool of drain workers forwards them to an [`EventSink`].
//! The queue is bounded: when full, the event being offered is dropped and
//! counted, and the producer returns immediately. A backpressured sink can
//! never stall an admission request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::core::DynamicObject;
use kube::runtime::events::{EventType, Recorder, Reporter};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bootstrap::ControllerRunner;
use crate::health::HealthState;

/// Default bound on the number of queued events.
pub const DEFAULT_MAX_QUEUED_EVENTS: usize = 1000;

/// Reference to the object an event describes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSubject {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl EventSubject {
    /// Subject for a (possibly mutated) admission object.
    pub fn for_resource(resource: &DynamicObject) -> Self {
        Self {
            kind: resource
                .types
                .as_ref()
                .map(|t| t.kind.clone())
                .unwrap_or_default(),
            namespace: resource.metadata.namespace.clone(),
            name: resource.metadata.name.clone().unwrap_or_default(),
        }
    }
}

/// A record describing a policy's effect on a request.
#[derive(Clone, Debug)]
pub struct Event {
    pub subject: EventSubject,
    pub reason: String,
    pub message: String,
    pub success: bool,
}

impl Event {
    /// Event for a policy whose rules were applied successfully.
    pub fn policy_applied(subject: EventSubject, policy: &str, rules: &[String]) -> Self {
        Self {
            subject,
            reason: "PolicyApplied".to_string(),
            message: format!("policy {policy} applied rules {rules:?}"),
            success: true,
        }
    }

    /// Event for a policy that failed to apply.
    pub fn policy_failed(subject: EventSubject, policy: &str, detail: &str) -> Self {
        Self {
            subject,
            reason: "PolicyFailed".to_string(),
            message: format!("policy {policy} failed: {detail}"),
            success: false,
        }
    }
}

/// Forwards drained events to their destination.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Persist one event. Delivery errors are the sink's concern; the
    /// drain never retries.
    async fn publish(&self, event: Event);
}

/// Bounded multi-producer event queue.
pub struct EventQueue;

impl EventQueue {
    /// Create a queue with the given capacity, returning the producer and
    /// consumer halves.
    pub fn bounded(
        capacity: usize,
        health: Option<Arc<HealthState>>,
    ) -> (EventEmitter, EventDrain) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            EventEmitter {
                tx,
                dropped: dropped.clone(),
                health: health.clone(),
            },
            EventDrain {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }
}

/// Producer half of the event queue. Cheap to clone.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
    health: Option<Arc<HealthState>>,
}

impl EventEmitter {
    /// Offer an event without blocking. Returns false if the event was
    /// dropped (queue full or drain gone); the drop is counted.
    pub fn emit(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                if let Some(health) = &self.health {
                    health.metrics.record_event_emitted();
                }
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(health) = &self.health {
                    health.metrics.record_event_dropped();
                }
                warn!(reason = %event.reason, subject = %event.subject.name, "Event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(reason = %event.reason, "Event drain stopped, dropping event");
                false
            }
        }
    }

    /// Number of events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half of the event queue.
pub struct EventDrain {
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
}

impl EventDrain {
    /// Drain the queue with a fixed pool of workers until cancellation.
    /// Queued events still in flight when the token fires are abandoned.
    pub async fn run(&self, token: CancellationToken, workers: usize, sink: Arc<dyn EventSink>) {
        let mut tasks = JoinSet::new();
        for worker in 0..workers.max(1) {
            let rx = self.rx.clone();
            let sink = sink.clone();
            let token = token.clone();
            tasks.spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = token.cancelled() => break,
                        event = async { rx.lock().await.recv().await } => event,
                    };
                    match event {
                        Some(event) => {
                            debug!(worker, reason = %event.reason, "Forwarding event");
                            sink.publish(event).await;
                        }
                        None => break,
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

/// Always-on controller wrapping the event drain.
pub struct EventDrainController {
    drain: EventDrain,
    sink: Arc<dyn EventSink>,
}

impl EventDrainController {
    pub fn new(drain: EventDrain, sink: Arc<dyn EventSink>) -> Self {
        Self { drain, sink }
    }
}

#[async_trait]
impl ControllerRunner for EventDrainController {
    async fn run(&self, token: CancellationToken, workers: usize) {
        self.drain.run(token, workers, self.sink.clone()).await;
    }
}

/// Sink publishing Kubernetes events through the API server.
pub struct RecorderSink {
    recorder: Recorder,
}

impl RecorderSink {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: "policy-operator".into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for RecorderSink {
    async fn publish(&self, event: Event) {
        let object_ref = ObjectReference {
            kind: Some(event.subject.kind.clone()),
            namespace: event.subject.namespace.clone(),
            name: Some(event.subject.name.clone()),
            ..Default::default()
        };
        let result = self
            .recorder
            .publish(
                &kube::runtime::events::Event {
                    type_: if event.success {
                        EventType::Normal
                    } else {
                        EventType::Warning
                    },
                    reason: event.reason.clone(),
                    note: Some(event.message.clone()),
                    action: "PolicyEvaluation".into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await;
        if let Err(e) = result {
            warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}
