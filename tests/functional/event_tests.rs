//! Event queue bound and drain behavior.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use policy_operator::events::{Event, EventQueue, EventSink, EventSubject};

use crate::fixtures::RecordingSink;

fn event(name: &str) -> Event {
    Event {
        subject: EventSubject {
            kind: "Pod".to_string(),
            namespace: Some("ns1".to_string()),
            name: name.to_string(),
        },
        reason: "PolicyApplied".to_string(),
        message: "applied".to_string(),
        success: true,
    }
}

#[test]
fn test_queue_bound_drops_newest_and_counts() {
    let (emitter, _drain) = EventQueue::bounded(4, None);
    let mut accepted = 0;
    for i in 0..10 {
        if emitter.emit(event(&format!("pod-{i}"))) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 4);
    assert_eq!(emitter.dropped(), 6);
}

#[tokio::test]
async fn test_producer_is_not_blocked_by_slow_sink() {
    struct SlowSink;

    #[async_trait]
    impl EventSink for SlowSink {
        async fn publish(&self, _event: Event) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    let (emitter, drain) = EventQueue::bounded(2, None);
    let token = CancellationToken::new();
    let drain_task = {
        let token = token.clone();
        tokio::spawn(async move { drain.run(token, 1, Arc::new(SlowSink)).await })
    };

    // With the single worker stuck in the sink, the queue fills and further
    // emits drop immediately instead of waiting.
    let start = Instant::now();
    for i in 0..20 {
        emitter.emit(event(&format!("pod-{i}")));
    }
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(emitter.dropped() > 0);

    token.cancel();
    let _ = drain_task.await;
}

#[tokio::test]
async fn test_drained_events_reach_sink() {
    let (emitter, drain) = EventQueue::bounded(8, None);
    let sink = Arc::new(RecordingSink::new());
    for i in 0..5 {
        assert!(emitter.emit(event(&format!("pod-{i}"))));
    }

    let token = CancellationToken::new();
    let drain_task = {
        let token = token.clone();
        let sink = sink.clone();
        async { drain.run(token, 3, sink).await }
    };
    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    };
    tokio::join!(drain_task, stop);

    let mut names: Vec<String> = sink.events().await.into_iter().map(|e| e.subject.name).collect();
    names.sort();
    assert_eq!(names, vec!["pod-0", "pod-1", "pod-2", "pod-3", "pod-4"]);
}
