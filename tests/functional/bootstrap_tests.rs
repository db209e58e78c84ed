//! Leader-gated bootstrap lifecycle tests.
//!
//! Verify that always-on controllers survive leadership churn, that
//! leader-only controllers are built fresh per term and stop promptly on
//! loss, and that process shutdown tears everything down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use policy_operator::bootstrap::{
    BootstrapError, CacheSync, Controller, ControllerRunner, LeaderGate, LeaderTerm,
    LeaderTermFactory, TermHandler, wait_for_cache_sync,
};

struct FlagRunner {
    running: Arc<AtomicBool>,
}

#[async_trait]
impl ControllerRunner for FlagRunner {
    async fn run(&self, token: CancellationToken, _workers: usize) {
        self.running.store(true, Ordering::SeqCst);
        token.cancelled().await;
        self.running.store(false, Ordering::SeqCst);
    }
}

struct InstantCache;

#[async_trait]
impl CacheSync for InstantCache {
    fn name(&self) -> &str {
        "instant"
    }

    async fn wait_ready(&self, _token: CancellationToken) -> bool {
        true
    }
}

/// Factory handing out one fresh tracked controller per term.
struct TrackingFactory {
    builds: AtomicUsize,
    terms: std::sync::Mutex<Vec<Arc<AtomicBool>>>,
}

impl TrackingFactory {
    fn new() -> Self {
        Self {
            builds: AtomicUsize::new(0),
            terms: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn term_flag(&self, index: usize) -> Arc<AtomicBool> {
        self.terms.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LeaderTermFactory for TrackingFactory {
    async fn build(&self) -> policy_operator::bootstrap::Result<LeaderTerm> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let running = Arc::new(AtomicBool::new(false));
        self.terms.lock().unwrap().push(running.clone());
        Ok(LeaderTerm {
            caches: vec![Arc::new(InstantCache)],
            controllers: vec![Controller::new(
                "leader-only",
                1,
                Arc::new(FlagRunner { running }),
            )],
        })
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_leader_isolation_across_loss_and_reacquisition() {
    let shutdown = CancellationToken::new();

    // Always-on controller, started before leadership is known.
    let always_on_running = Arc::new(AtomicBool::new(false));
    let always_on = Controller::new(
        "always-on",
        1,
        Arc::new(FlagRunner {
            running: always_on_running.clone(),
        }),
    );
    let mut always_on_tasks = JoinSet::new();
    always_on.spawn(shutdown.clone(), &mut always_on_tasks);

    let factory = Arc::new(TrackingFactory::new());
    let gate = Arc::new(LeaderGate::new(
        factory.clone(),
        Duration::from_secs(1),
        shutdown.clone(),
    ));

    // Term 1: acquisition.
    let term1 = shutdown.child_token();
    let term1_task = {
        let gate = gate.clone();
        let term = term1.clone();
        tokio::spawn(async move { gate.on_acquired(term).await })
    };
    settle().await;
    assert!(always_on_running.load(Ordering::SeqCst));
    assert!(factory.term_flag(0).load(Ordering::SeqCst));

    // Leadership loss: the term's controllers stop, always-on keeps going.
    term1.cancel();
    term1_task.await.unwrap();
    assert!(!factory.term_flag(0).load(Ordering::SeqCst));
    assert!(always_on_running.load(Ordering::SeqCst));

    // Term 2: a fresh bundle, never the prior term's instances.
    let term2 = shutdown.child_token();
    let term2_task = {
        let gate = gate.clone();
        let term = term2.clone();
        tokio::spawn(async move { gate.on_acquired(term).await })
    };
    settle().await;
    assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    assert!(factory.term_flag(1).load(Ordering::SeqCst));
    assert!(!factory.term_flag(0).load(Ordering::SeqCst));
    assert!(always_on_running.load(Ordering::SeqCst));

    // Process shutdown tears down the active term and the always-on set.
    shutdown.cancel();
    term2_task.await.unwrap();
    while always_on_tasks.join_next().await.is_some() {}
    assert!(!factory.term_flag(1).load(Ordering::SeqCst));
    assert!(!always_on_running.load(Ordering::SeqCst));
    assert!(gate.take_fatal().is_none());
}

#[tokio::test]
async fn test_process_shutdown_cancels_active_term_token() {
    let shutdown = CancellationToken::new();
    let factory = Arc::new(TrackingFactory::new());
    let gate = Arc::new(LeaderGate::new(
        factory.clone(),
        Duration::from_secs(1),
        shutdown.clone(),
    ));

    // The term token derives from shutdown, so cancelling shutdown ends the
    // term without a separate loss signal.
    let term = shutdown.child_token();
    let task = {
        let gate = gate.clone();
        let term = term.clone();
        tokio::spawn(async move { gate.on_acquired(term).await })
    };
    settle().await;
    assert!(factory.term_flag(0).load(Ordering::SeqCst));

    shutdown.cancel();
    task.await.unwrap();
    assert!(!factory.term_flag(0).load(Ordering::SeqCst));
}

struct NeverReadyCache;

#[async_trait]
impl CacheSync for NeverReadyCache {
    fn name(&self) -> &str {
        "never-ready"
    }

    async fn wait_ready(&self, token: CancellationToken) -> bool {
        token.cancelled().await;
        false
    }
}

#[tokio::test]
async fn test_always_on_cache_sync_timeout_is_fatal_error() {
    let shutdown = CancellationToken::new();
    let caches: Vec<Arc<dyn CacheSync>> = vec![Arc::new(NeverReadyCache)];
    let result = wait_for_cache_sync(&shutdown, Duration::from_millis(30), &caches).await;
    assert!(matches!(result, Err(BootstrapError::CacheSyncTimeout(_))));
}

/// A controller must never start against an unsynced cache: the gate aborts
/// the term and records a fatal error before spawning anything.
#[tokio::test]
async fn test_leader_cache_sync_timeout_aborts_term_before_start() {
    struct NeverReadyFactory {
        started: Arc<AtomicBool>,
    }

    #[async_trait]
    impl LeaderTermFactory for NeverReadyFactory {
        async fn build(&self) -> policy_operator::bootstrap::Result<LeaderTerm> {
            Ok(LeaderTerm {
                caches: vec![Arc::new(NeverReadyCache)],
                controllers: vec![Controller::new(
                    "leader-only",
                    1,
                    Arc::new(FlagRunner {
                        running: self.started.clone(),
                    }),
                )],
            })
        }
    }

    let started = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();
    let gate = Arc::new(LeaderGate::new(
        Arc::new(NeverReadyFactory {
            started: started.clone(),
        }),
        Duration::from_millis(30),
        shutdown.clone(),
    ));

    gate.on_acquired(shutdown.child_token()).await;

    assert!(!started.load(Ordering::SeqCst));
    assert!(shutdown.is_cancelled());
    assert!(matches!(
        gate.take_fatal(),
        Some(BootstrapError::CacheSyncTimeout(_))
    ));
}
