//! End-to-end tests for the admission and delivery pipeline.
//!
//! Exercises the public surface the way the surrounding bot process does:
//! commands enter the request queue and are resolved by a handler task,
//! chain events flow through the aggregator into per-subscriber digests,
//! and the health monitor reports on the wired collaborators.

use {
    async_trait::async_trait,
    chainping::{
        aggregator::EventAggregator,
        collab::{
            EventStore, MemoryEventStore, MemorySubscriberDirectory, MessageTransport,
            SendOutcome, SubscriberDirectory,
        },
        config::{AggregatorConfig, HealthConfig, QueueConfig},
        error::{ProbeError, TransportError},
        event::{ChainEvent, EventKind},
        health::{HealthMonitor, MemoryGauge, NetworkProbe, StoreProbe, TransportProbe},
        queue::{DispatchedRequest, NewRequest, QueueSignal, RequestQueue},
    },
    std::sync::{Arc, Mutex},
    tokio::sync::mpsc,
};

/// Transport that records every delivered message.
#[derive(Default)]
struct CapturingTransport {
    messages: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageTransport for CapturingTransport {
    async fn send(&self, recipient: &str, text: &str) -> Result<SendOutcome, TransportError> {
        self.messages
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(SendOutcome::Delivered)
    }
}

struct AlwaysOk;

#[async_trait]
impl StoreProbe for AlwaysOk {
    async fn check(&self) -> Result<(), ProbeError> {
        Ok(())
    }
    async fn reconnect(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

#[async_trait]
impl TransportProbe for AlwaysOk {
    async fn check(&self) -> Result<(), ProbeError> {
        Ok(())
    }
    async fn restart(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

#[async_trait]
impl NetworkProbe for AlwaysOk {
    async fn check(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

struct TinyGauge;

impl MemoryGauge for TinyGauge {
    fn used_bytes(&self) -> u64 {
        1
    }
    fn reclaim(&self) {}
}

fn make_event(kind: EventKind, tx: &str) -> ChainEvent {
    ChainEvent {
        kind,
        contract: "0x00000000000000000000000000000000000000aa".to_string(),
        tx_hash: tx.to_string(),
        block_number: 1,
        detail: "integration event".to_string(),
        timestamp: chainping::event::now_ms(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_commands_flow_through_queue_and_handler() {
    let cfg = QueueConfig {
        max_concurrent: 2,
        max_queue_size: 10,
        processing_timeout_ms: 5_000,
        rate_limit_window_ms: 60_000,
        rate_limit_max: 20,
        poll_interval_ms: 10,
        maintenance_interval_ms: 60_000,
    };
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<DispatchedRequest>(16);
    let queue = RequestQueue::new(cfg, dispatch_tx);
    let mut signals = queue.subscribe();

    let runner = queue.clone();
    let run_handle = tokio::spawn(async move { runner.run().await });

    // Handler task: echoes every command back as success.
    tokio::spawn(async move {
        while let Some(dispatched) = dispatch_rx.recv().await {
            let reply = serde_json::json!({ "echo": dispatched.item.kind });
            let _ = dispatched.done.send(Ok(reply));
        }
    });

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = queue
            .add_request(NewRequest {
                user_id: format!("user_{}", i % 2),
                kind: "subscribe".to_string(),
                data: serde_json::json!({ "n": i }),
                priority: i,
            })
            .unwrap();
        ids.push(id);
    }

    // Every admitted request reaches a terminal Completed signal.
    let mut completed = Vec::new();
    while completed.len() < 5 {
        match signals.recv().await.unwrap() {
            QueueSignal::Completed(item) => completed.push(item.id),
            QueueSignal::Failed(item) | QueueSignal::TimedOut(item) => {
                panic!("request {} did not complete cleanly", item.id)
            }
            _ => {}
        }
    }
    for id in &ids {
        assert!(completed.contains(id));
    }

    let status = queue.status();
    assert_eq!(status.queued, 0);
    assert_eq!(status.active, 0);

    queue.stop_processing();
    let _ = run_handle.await;
}

#[tokio::test]
async fn test_events_flow_into_subscriber_digests() {
    let directory = Arc::new(MemorySubscriberDirectory::new());
    directory.add("chat_a").await.unwrap();
    directory.add("chat_b").await.unwrap();

    let store = Arc::new(MemoryEventStore::new());
    let transport = Arc::new(CapturingTransport::default());

    let aggregator = EventAggregator::new(
        AggregatorConfig {
            broadcast_interval_ms: 60_000,
            max_events_per_batch: 3,
            min_broadcast_interval_ms: 0,
        },
        directory.clone(),
        store.clone(),
        transport.clone(),
    );

    aggregator
        .add_event(make_event(EventKind::Transfer, "0x01"))
        .await;
    aggregator
        .add_event(make_event(EventKind::Transfer, "0x02"))
        .await;
    aggregator
        .add_event(make_event(EventKind::Mint, "0x03"))
        .await;

    // Size threshold flushed one digest to each subscriber.
    let messages = transport.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    let recipients: Vec<&str> = messages.iter().map(|(r, _)| r.as_str()).collect();
    assert!(recipients.contains(&"chat_a"));
    assert!(recipients.contains(&"chat_b"));

    let (_, text) = &messages[0];
    assert!(text.contains("3 new in this batch"));
    assert!(text.contains("2 × transfer"));
    assert!(text.contains("1 × mint"));

    // Events also reached the historical store.
    assert_eq!(store.list_all().await.unwrap().len(), 3);
    let status = aggregator.status().await;
    assert_eq!(status.queued, 0);
    assert_eq!(status.last_sent, 2);
    assert_eq!(status.subscriber_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_handler_driven_subscription_then_broadcast() {
    // A "subscribe" command admitted through the queue adds the requester to
    // the directory; a later event burst reaches them.
    let directory = Arc::new(MemorySubscriberDirectory::new());
    let store = Arc::new(MemoryEventStore::new());
    let transport = Arc::new(CapturingTransport::default());

    let aggregator = EventAggregator::new(
        AggregatorConfig {
            broadcast_interval_ms: 60_000,
            max_events_per_batch: 2,
            min_broadcast_interval_ms: 0,
        },
        directory.clone(),
        store,
        transport.clone(),
    );

    let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<DispatchedRequest>(16);
    let queue = RequestQueue::new(QueueConfig::default(), dispatch_tx);
    let mut signals = queue.subscribe();

    let runner = queue.clone();
    let run_handle = tokio::spawn(async move { runner.run().await });

    let handler_directory = directory.clone();
    tokio::spawn(async move {
        while let Some(dispatched) = dispatch_rx.recv().await {
            if dispatched.item.kind == "subscribe" {
                let _ = handler_directory.add(&dispatched.item.user_id).await;
            }
            let _ = dispatched.done.send(Ok(serde_json::Value::Null));
        }
    });

    queue
        .add_request(NewRequest {
            user_id: "alice".to_string(),
            kind: "subscribe".to_string(),
            data: serde_json::json!({}),
            priority: 1,
        })
        .unwrap();

    loop {
        if let QueueSignal::Completed(_) = signals.recv().await.unwrap() {
            break;
        }
    }
    assert_eq!(directory.list().await.unwrap(), vec!["alice"]);

    aggregator
        .add_event(make_event(EventKind::Burn, "0x0a"))
        .await;
    aggregator
        .add_event(make_event(EventKind::Burn, "0x0b"))
        .await;

    let messages = transport.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "alice");

    queue.stop_processing();
    let _ = run_handle.await;
}

#[tokio::test]
async fn test_health_monitor_reports_on_wired_pipeline() {
    let monitor = HealthMonitor::new(
        HealthConfig {
            check_interval_ms: 1_000,
            memory_check_interval_ms: 500,
            max_failures: 3,
            recovery_timeout_ms: 100,
            memory_limit_bytes: 1024,
        },
        Arc::new(AlwaysOk),
        Arc::new(AlwaysOk),
        Arc::new(AlwaysOk),
        Arc::new(TinyGauge),
    );

    let snapshot = monitor.force_health_check().await;
    assert!(snapshot.is_healthy);
    assert!(snapshot.all_ok());

    let reported = monitor.health_status();
    assert_eq!(reported.failure_count, snapshot.failure_count);
    assert_eq!(reported.last_check_ms, snapshot.last_check_ms);

    let info = monitor.system_info();
    assert_eq!(info.memory_used_bytes, 1);
    assert_eq!(info.memory_limit_bytes, 1024);

    monitor.start();
    monitor.stop();
}
