//! Event aggregator - batches chain events into periodic digest broadcasts.
//!
//! Decouples the rate of incoming chain events from the rate of outbound
//! notifications. Events queue in arrival order; a timer tick and a size
//! threshold both trigger flush attempts, gated by a minimum broadcast
//! interval so size-triggered storms collapse into one send. Delivery
//! failures classified as recipient-gone drop the subscriber from the
//! directory; transient failures are counted and the subscriber retained.

use {
    crate::collab::{EventStore, MessageTransport, SendOutcome, SubscriberDirectory},
    crate::config::AggregatorConfig,
    crate::digest::build_digest,
    crate::event::{system_clock, ChainEvent, Clock, QueuedEvent},
    std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
    },
    tokio::time::{interval, Duration},
};

/// Read-only aggregator status snapshot.
#[derive(Debug, Clone)]
pub struct AggregatorStatus {
    pub queued: usize,
    pub flushing: bool,
    /// Millis of the last broadcast attempt, 0 before the first one.
    pub last_broadcast_ms: i64,
    pub subscriber_count: usize,
    /// Delivery counts from the most recent broadcast.
    pub last_sent: usize,
    pub last_failed: usize,
}

struct AggregatorState {
    queue: VecDeque<QueuedEvent>,
    last_broadcast_ms: i64,
    last_sent: usize,
    last_failed: usize,
}

/// Batching broadcast pipeline between the chain poller and the chat
/// transport. Cheap to clone; state is shared behind `Arc`.
#[derive(Clone)]
pub struct EventAggregator {
    cfg: AggregatorConfig,
    state: Arc<Mutex<AggregatorState>>,
    flushing: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    directory: Arc<dyn SubscriberDirectory>,
    store: Arc<dyn EventStore>,
    transport: Arc<dyn MessageTransport>,
    clock: Clock,
}

impl EventAggregator {
    pub fn new(
        cfg: AggregatorConfig,
        directory: Arc<dyn SubscriberDirectory>,
        store: Arc<dyn EventStore>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self::with_clock(cfg, directory, store, transport, system_clock())
    }

    /// Constructor with injected clock for deterministic tests.
    pub fn with_clock(
        cfg: AggregatorConfig,
        directory: Arc<dyn SubscriberDirectory>,
        store: Arc<dyn EventStore>,
        transport: Arc<dyn MessageTransport>,
        clock: Clock,
    ) -> Self {
        Self {
            cfg,
            state: Arc::new(Mutex::new(AggregatorState {
                queue: VecDeque::new(),
                last_broadcast_ms: 0,
                last_sent: 0,
                last_failed: 0,
            })),
            flushing: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
            directory,
            store,
            transport,
            clock,
        }
    }

    /// Append a timestamped event to the queue (and the historical store).
    /// Reaching the batch-size threshold triggers an immediate flush attempt,
    /// still subject to the minimum-interval gate.
    pub async fn add_event(&self, event: ChainEvent) {
        if let Err(e) = self.store.append(event.clone()).await {
            log::warn!("⚠️  Failed to persist event {}: {}", event.tx_hash, e);
        }

        let queued_len = {
            let mut state = self.state.lock().unwrap();
            state.queue.push_back(QueuedEvent {
                event,
                queued_at: (self.clock)(),
            });
            state.queue.len()
        };

        if queued_len >= self.cfg.max_events_per_batch {
            log::debug!(
                "📦 Batch threshold reached ({} events), attempting flush",
                queued_len
            );
            self.process_batch().await;
        }
    }

    /// Timer loop invoking `process_batch` every broadcast interval until
    /// stopped.
    pub async fn run(&self) {
        log::info!(
            "🚀 Event aggregator started (interval: {}ms, batch: {}, min gap: {}ms)",
            self.cfg.broadcast_interval_ms,
            self.cfg.max_events_per_batch,
            self.cfg.min_broadcast_interval_ms
        );

        let mut tick = interval(Duration::from_millis(self.cfg.broadcast_interval_ms));
        // First tick fires immediately; skip it so the first broadcast waits
        // a full interval.
        tick.tick().await;

        while self.running.load(Ordering::Acquire) {
            tick.tick().await;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.process_batch().await;
        }

        log::info!("✅ Event aggregator stopped");
    }

    /// Flush one batch: pop up to `max_events_per_batch` events, build a
    /// digest per subscriber, deliver, and classify failures.
    ///
    /// No-ops: a flush already in progress (re-entry rejected, not queued),
    /// an empty queue, or a broadcast inside the minimum interval. With no
    /// subscribers the queue is drained without sending.
    pub async fn process_batch(&self) {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("⏭️  Flush already in progress, skipping");
            return;
        }
        let _guard = FlushGuard(&self.flushing);

        let now = (self.clock)();
        {
            let state = self.state.lock().unwrap();
            if state.queue.is_empty() {
                return;
            }
            let since_last = now - state.last_broadcast_ms;
            if since_last < self.cfg.min_broadcast_interval_ms as i64 {
                log::debug!(
                    "⏳ Broadcast gated ({}ms since last, min {}ms), {} events stay queued",
                    since_last,
                    self.cfg.min_broadcast_interval_ms,
                    state.queue.len()
                );
                return;
            }
        }

        let subscribers = match self.directory.list().await {
            Ok(subs) => subs,
            Err(e) => {
                log::error!("❌ Failed to list subscribers, skipping flush: {}", e);
                return;
            }
        };

        if subscribers.is_empty() {
            let drained = {
                let mut state = self.state.lock().unwrap();
                let drained = state.queue.len();
                state.queue.clear();
                drained
            };
            log::info!("📭 No subscribers, dropped {} queued events", drained);
            return;
        }

        let batch: Vec<QueuedEvent> = {
            let mut state = self.state.lock().unwrap();
            let take = state.queue.len().min(self.cfg.max_events_per_batch);
            state.queue.drain(..take).collect()
        };

        let all_events = match self.store.list_all().await {
            Ok(events) => events,
            Err(e) => {
                log::warn!("⚠️  Event store unavailable, digest lacks history: {}", e);
                Vec::new()
            }
        };

        let text = build_digest(&batch, &all_events, now);

        let mut sent = 0usize;
        let mut failed = 0usize;
        let mut removed = 0usize;
        for subscriber in &subscribers {
            match self.transport.send(subscriber, &text).await {
                Ok(SendOutcome::Delivered) => sent += 1,
                Ok(SendOutcome::RecipientGone) => {
                    log::info!("👋 Subscriber {} is gone, removing", subscriber);
                    if let Err(e) = self.directory.remove(subscriber).await {
                        log::warn!("⚠️  Failed to remove subscriber {}: {}", subscriber, e);
                    }
                    removed += 1;
                }
                Err(e) => {
                    log::warn!("⚠️  Delivery to {} failed: {}", subscriber, e);
                    failed += 1;
                }
            }
        }

        // The broadcast time advances even when every delivery failed; the
        // minimum interval gates attempts, not successes.
        {
            let mut state = self.state.lock().unwrap();
            state.last_broadcast_ms = (self.clock)();
            state.last_sent = sent;
            state.last_failed = failed;
        }

        log::info!(
            "📣 Broadcast complete: {} events, {} sent, {} failed, {} removed",
            batch.len(),
            sent,
            failed,
            removed
        );
    }

    pub async fn status(&self) -> AggregatorStatus {
        let subscriber_count = self.directory.list().await.map(|s| s.len()).unwrap_or(0);
        let state = self.state.lock().unwrap();
        AggregatorStatus {
            queued: state.queue.len(),
            flushing: self.flushing.load(Ordering::Acquire),
            last_broadcast_ms: state.last_broadcast_ms,
            subscriber_count,
            last_sent: state.last_sent,
            last_failed: state.last_failed,
        }
    }

    /// Empty the pending-event queue, returning the number removed.
    pub fn clear_queue(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let removed = state.queue.len();
        state.queue.clear();
        removed
    }

    /// Halt future timer ticks. An in-flight flush resolves independently.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Resets the flush flag on every exit path of `process_batch`.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{MemoryEventStore, MemorySubscriberDirectory};
    use crate::error::TransportError;
    use crate::event::EventKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicI64;

    /// Transport mock recording sends and scripting per-recipient outcomes.
    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<(String, String)>>,
        gone: Mutex<Vec<String>>,
        failing: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn mark_gone(&self, recipient: &str) {
            self.gone.lock().unwrap().push(recipient.to_string());
        }

        fn mark_failing(&self, recipient: &str) {
            self.failing.lock().unwrap().push(recipient.to_string());
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageTransport for MockTransport {
        async fn send(
            &self,
            recipient: &str,
            text: &str,
        ) -> Result<SendOutcome, TransportError> {
            if self.gone.lock().unwrap().iter().any(|r| r == recipient) {
                return Ok(SendOutcome::RecipientGone);
            }
            if self.failing.lock().unwrap().iter().any(|r| r == recipient) {
                return Err(TransportError("connection reset".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), text.to_string()));
            Ok(SendOutcome::Delivered)
        }
    }

    fn manual_clock() -> (Arc<AtomicI64>, Clock) {
        let now = Arc::new(AtomicI64::new(1_700_000_000_000));
        let clock_now = now.clone();
        let clock: Clock = Arc::new(move || clock_now.load(Ordering::SeqCst));
        (now, clock)
    }

    fn make_event(tx: &str) -> ChainEvent {
        ChainEvent {
            kind: EventKind::Transfer,
            contract: "0xc0ffee".to_string(),
            tx_hash: tx.to_string(),
            block_number: 7,
            detail: "moved tokens".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    struct Fixture {
        aggregator: EventAggregator,
        directory: Arc<MemorySubscriberDirectory>,
        transport: Arc<MockTransport>,
        now: Arc<AtomicI64>,
    }

    async fn fixture(cfg: AggregatorConfig, subscribers: &[&str]) -> Fixture {
        let directory = Arc::new(MemorySubscriberDirectory::new());
        for sub in subscribers {
            directory.add(sub).await.unwrap();
        }
        let store = Arc::new(MemoryEventStore::new());
        let transport = Arc::new(MockTransport::default());
        let (now, clock) = manual_clock();
        let aggregator = EventAggregator::with_clock(
            cfg,
            directory.clone(),
            store,
            transport.clone(),
            clock,
        );
        Fixture {
            aggregator,
            directory,
            transport,
            now,
        }
    }

    fn small_batch_config() -> AggregatorConfig {
        AggregatorConfig {
            broadcast_interval_ms: 60_000,
            max_events_per_batch: 5,
            min_broadcast_interval_ms: 10_000,
        }
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_flush() {
        let f = fixture(small_batch_config(), &["chat_1"]).await;

        // Four events queue quietly.
        for i in 0..4 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }
        assert_eq!(f.aggregator.status().await.queued, 4);
        assert_eq!(f.transport.sent_count(), 0);

        // The fifth reaches the threshold and flushes everything.
        f.aggregator.add_event(make_event("0x4")).await;
        assert_eq!(f.aggregator.status().await.queued, 0);
        assert_eq!(f.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_min_interval_gates_second_flush() {
        let f = fixture(small_batch_config(), &["chat_1"]).await;

        for i in 0..5 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }
        assert_eq!(f.transport.sent_count(), 1);

        // 2 seconds later another size-triggered flush is gated; events stay
        // queued for the next eligible cycle.
        f.now.fetch_add(2_000, Ordering::SeqCst);
        for i in 5..10 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }
        assert_eq!(f.transport.sent_count(), 1);
        assert_eq!(f.aggregator.status().await.queued, 5);

        // Once the minimum interval has elapsed the flush goes through.
        f.now.fetch_add(10_000, Ordering::SeqCst);
        f.aggregator.process_batch().await;
        assert_eq!(f.transport.sent_count(), 2);
        assert_eq!(f.aggregator.status().await.queued, 0);
    }

    #[tokio::test]
    async fn test_partial_flush_keeps_remainder_in_order() {
        let mut cfg = small_batch_config();
        cfg.max_events_per_batch = 3;
        let f = fixture(cfg, &["chat_1"]).await;

        // First three events flush immediately and start the min-interval
        // gate; the next seven accumulate because their size-triggered
        // attempts all land inside the gate.
        for i in 0..10 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }
        assert_eq!(f.transport.sent_count(), 1);
        assert_eq!(f.aggregator.status().await.queued, 7);

        f.now.fetch_add(20_000, Ordering::SeqCst);
        f.aggregator.process_batch().await;

        // One batch of three popped; the remainder keeps arrival order.
        assert_eq!(f.aggregator.status().await.queued, 4);
        let remaining: Vec<String> = f
            .aggregator
            .state
            .lock()
            .unwrap()
            .queue
            .iter()
            .map(|q| q.event.tx_hash.clone())
            .collect();
        assert_eq!(remaining, vec!["0x6", "0x7", "0x8", "0x9"]);
    }

    #[tokio::test]
    async fn test_no_subscribers_drains_without_sending() {
        let f = fixture(small_batch_config(), &[]).await;

        for i in 0..5 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }

        assert_eq!(f.aggregator.status().await.queued, 0);
        assert_eq!(f.transport.sent_count(), 0);
        // No broadcast happened, so the gate timestamp is untouched.
        assert_eq!(f.aggregator.status().await.last_broadcast_ms, 0);
    }

    #[tokio::test]
    async fn test_recipient_gone_removes_subscriber() {
        let f = fixture(small_batch_config(), &["chat_ok", "chat_gone"]).await;
        f.transport.mark_gone("chat_gone");

        for i in 0..5 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }

        let subs = f.directory.list().await.unwrap();
        assert_eq!(subs, vec!["chat_ok"]);
        assert_eq!(f.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_subscriber() {
        let f = fixture(small_batch_config(), &["chat_ok", "chat_flaky"]).await;
        f.transport.mark_failing("chat_flaky");

        for i in 0..5 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }

        let subs = f.directory.list().await.unwrap();
        assert_eq!(subs.len(), 2);

        let status = f.aggregator.status().await;
        assert_eq!(status.last_sent, 1);
        assert_eq!(status.last_failed, 1);
        // Broadcast time advanced despite the failure.
        assert!(status.last_broadcast_ms > 0);
    }

    #[tokio::test]
    async fn test_digest_contains_history_counts() {
        let f = fixture(small_batch_config(), &["chat_1"]).await;

        for i in 0..5 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }

        let sent = f.transport.sent.lock().unwrap();
        let (_, text) = &sent[0];
        assert!(text.contains("all-time"));
        assert!(text.contains("5 new in this batch"));
        assert!(text.contains("transfer"));
    }

    #[tokio::test]
    async fn test_clear_queue_returns_count() {
        let f = fixture(small_batch_config(), &["chat_1"]).await;
        for i in 0..3 {
            f.aggregator.add_event(make_event(&format!("0x{}", i))).await;
        }
        assert_eq!(f.aggregator.clear_queue(), 3);
        assert_eq!(f.aggregator.status().await.queued, 0);
    }
}
