//! Request queue - admission control and priority scheduling for user commands.
//!
//! Inbound commands pass two admission gates (per-user sliding-window rate
//! limit, global queue bound) and are inserted with a stable priority order:
//! higher priority jumps ahead of lower, equal priority stays FIFO.
//!
//! The scheduler loop dequeues while concurrency slots are free and hands work
//! to external handlers over an mpsc channel. Each dispatched request carries a
//! oneshot completion handle the handler must resolve exactly once; the
//! scheduler awaits that resolution under the configured processing timeout
//! and reports the outcome through broadcast signals.

use {
    crate::config::QueueConfig,
    crate::error::AdmissionError,
    crate::event::{system_clock, Clock},
    serde::Serialize,
    std::{
        collections::{HashMap, VecDeque},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
    },
    tokio::{
        sync::{broadcast, mpsc, oneshot, Notify},
        time::{interval, timeout, Duration},
    },
};

/// Request lifecycle status. Transitions are monotonic:
/// Queued -> Processing -> {Completed | Error | Timeout}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Timeout,
}

/// One admitted unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub data: serde_json::Value,
    pub priority: i32,
    pub status: RequestStatus,
    pub queued_at: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// Fields the caller provides at admission time.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub user_id: String,
    pub kind: String,
    pub data: serde_json::Value,
    pub priority: i32,
}

/// Observer signals raised by the queue.
#[derive(Debug, Clone)]
pub enum QueueSignal {
    Queued(QueueItem),
    Processing(QueueItem),
    Completed(QueueItem),
    Failed(QueueItem),
    TimedOut(QueueItem),
    Cleared { removed: usize },
}

/// A dispatched request handed to an external handler.
///
/// The handler must resolve `done` exactly once with the command result;
/// dropping it without resolving is reported as a processing error.
#[derive(Debug)]
pub struct DispatchedRequest {
    pub item: QueueItem,
    pub done: oneshot::Sender<Result<serde_json::Value, String>>,
}

/// Read-only queue status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

struct QueueState {
    queue: VecDeque<QueueItem>,
    active: usize,
    /// Per-user admission timestamps (millis) within the rate-limit window.
    rate_buckets: HashMap<String, Vec<i64>>,
}

/// Priority request queue with per-user rate limiting and bounded concurrency.
///
/// Cheap to clone; all state is shared behind `Arc`.
#[derive(Clone)]
pub struct RequestQueue {
    cfg: QueueConfig,
    state: Arc<Mutex<QueueState>>,
    signal_tx: broadcast::Sender<QueueSignal>,
    dispatch_tx: mpsc::Sender<DispatchedRequest>,
    wake: Arc<Notify>,
    running: Arc<AtomicBool>,
    clock: Clock,
}

impl RequestQueue {
    pub fn new(cfg: QueueConfig, dispatch_tx: mpsc::Sender<DispatchedRequest>) -> Self {
        Self::with_clock(cfg, dispatch_tx, system_clock())
    }

    /// Constructor with injected clock for deterministic tests.
    pub fn with_clock(
        cfg: QueueConfig,
        dispatch_tx: mpsc::Sender<DispatchedRequest>,
        clock: Clock,
    ) -> Self {
        let (signal_tx, _) = broadcast::channel(64);
        Self {
            cfg,
            state: Arc::new(Mutex::new(QueueState {
                queue: VecDeque::new(),
                active: 0,
                rate_buckets: HashMap::new(),
            })),
            signal_tx,
            dispatch_tx,
            wake: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(true)),
            clock,
        }
    }

    /// Subscribe to queue signals.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueSignal> {
        self.signal_tx.subscribe()
    }

    /// Admit a request, returning its id.
    ///
    /// Fails with `RateLimitExceeded` when the user already has
    /// `rate_limit_max` admissions inside the trailing window, and with
    /// `QueueFull` when the queue is at its size bound. The insert is a
    /// stable priority insert: the item lands ahead of the first queued item
    /// with a strictly lower priority, behind everything of equal or higher
    /// priority that arrived earlier.
    pub fn add_request(&self, request: NewRequest) -> Result<String, AdmissionError> {
        let now = (self.clock)();
        let item = {
            let mut state = self.state.lock().unwrap();

            let window = self.cfg.rate_limit_window_ms as i64;
            {
                let bucket = state.rate_buckets.entry(request.user_id.clone()).or_default();
                bucket.retain(|ts| now - ts < window);
                if bucket.len() >= self.cfg.rate_limit_max as usize {
                    return Err(AdmissionError::RateLimitExceeded {
                        max: self.cfg.rate_limit_max,
                        window_ms: self.cfg.rate_limit_window_ms,
                    });
                }
            }

            if state.queue.len() >= self.cfg.max_queue_size {
                return Err(AdmissionError::QueueFull {
                    size: state.queue.len(),
                });
            }

            // Count the admission against the user only once both gates pass.
            if let Some(bucket) = state.rate_buckets.get_mut(&request.user_id) {
                bucket.push(now);
            }

            let item = QueueItem {
                id: generate_request_id(now),
                user_id: request.user_id,
                kind: request.kind,
                data: request.data,
                priority: request.priority,
                status: RequestStatus::Queued,
                queued_at: now,
                started_at: None,
                ended_at: None,
                duration_ms: None,
                error: None,
            };

            let pos = state
                .queue
                .iter()
                .position(|queued| queued.priority < item.priority)
                .unwrap_or(state.queue.len());
            state.queue.insert(pos, item.clone());
            item
        };

        log::debug!(
            "📥 Queued request {} (user: {}, kind: {}, priority: {})",
            item.id,
            item.user_id,
            item.kind,
            item.priority
        );
        let id = item.id.clone();
        let _ = self.signal_tx.send(QueueSignal::Queued(item));
        self.wake.notify_one();
        Ok(id)
    }

    /// Scheduler loop. Dispatches queued work while concurrency slots are
    /// free, then waits on a notify/poll tick until more work or a freed slot
    /// arrives. Runs until `stop_processing` is called.
    pub async fn run(&self) {
        log::info!(
            "🚀 Request queue started (max_concurrent: {}, max_queue_size: {})",
            self.cfg.max_concurrent,
            self.cfg.max_queue_size
        );

        let mut poll = interval(Duration::from_millis(self.cfg.poll_interval_ms));
        let mut maintenance = interval(Duration::from_millis(self.cfg.maintenance_interval_ms));

        while self.running.load(Ordering::Acquire) {
            self.dispatch_ready().await;

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = poll.tick() => {}
                _ = maintenance.tick() => {
                    self.prune_rate_buckets();
                }
            }
        }

        log::info!("✅ Request queue stopped");
    }

    /// Dispatch queued items until the concurrency ceiling is reached.
    async fn dispatch_ready(&self) {
        loop {
            let item = {
                let mut state = self.state.lock().unwrap();
                if state.active >= self.cfg.max_concurrent {
                    break;
                }
                let mut item = match state.queue.pop_front() {
                    Some(item) => item,
                    None => break,
                };
                item.status = RequestStatus::Processing;
                item.started_at = Some((self.clock)());
                state.active += 1;
                item
            };

            let (done_tx, done_rx) = oneshot::channel();
            let dispatched = DispatchedRequest {
                item: item.clone(),
                done: done_tx,
            };

            if let Err(e) = self.dispatch_tx.send(dispatched).await {
                log::error!("❌ Handler channel closed, failing request {}: {}", item.id, e);
                self.finalize(item, RequestStatus::Error, Some("handler channel closed".into()));
                continue;
            }

            let _ = self.signal_tx.send(QueueSignal::Processing(item.clone()));

            let queue = self.clone();
            let deadline = Duration::from_millis(self.cfg.processing_timeout_ms);
            tokio::spawn(async move {
                match timeout(deadline, done_rx).await {
                    Ok(Ok(Ok(_result))) => {
                        queue.finalize(item, RequestStatus::Completed, None);
                    }
                    Ok(Ok(Err(message))) => {
                        queue.finalize(item, RequestStatus::Error, Some(message));
                    }
                    Ok(Err(_dropped)) => {
                        queue.finalize(
                            item,
                            RequestStatus::Error,
                            Some("handler dropped completion handle".into()),
                        );
                    }
                    Err(_elapsed) => {
                        queue.finalize(
                            item,
                            RequestStatus::Timeout,
                            Some("request processing timed out".into()),
                        );
                    }
                }
            });
        }
    }

    /// Record the terminal status of a dispatched item, free its concurrency
    /// slot, and raise the matching signal.
    fn finalize(&self, mut item: QueueItem, status: RequestStatus, error: Option<String>) {
        let now = (self.clock)();
        item.status = status;
        item.error = error;
        item.ended_at = Some(now);
        item.duration_ms = item.started_at.map(|start| (now - start).max(0) as u64);

        {
            let mut state = self.state.lock().unwrap();
            state.active = state.active.saturating_sub(1);
        }

        let signal = match status {
            RequestStatus::Completed => {
                log::debug!(
                    "✅ Request {} completed in {}ms",
                    item.id,
                    item.duration_ms.unwrap_or(0)
                );
                QueueSignal::Completed(item)
            }
            RequestStatus::Timeout => {
                log::warn!("⏱️  Request {} timed out", item.id);
                QueueSignal::TimedOut(item)
            }
            _ => {
                log::warn!(
                    "❌ Request {} failed: {}",
                    item.id,
                    item.error.as_deref().unwrap_or("unknown")
                );
                QueueSignal::Failed(item)
            }
        };
        let _ = self.signal_tx.send(signal);
        self.wake.notify_one();
    }

    /// Drop rate-limit buckets whose window has fully elapsed.
    fn prune_rate_buckets(&self) {
        let now = (self.clock)();
        let window = self.cfg.rate_limit_window_ms as i64;
        let mut state = self.state.lock().unwrap();
        let before = state.rate_buckets.len();
        state.rate_buckets.retain(|_, bucket| {
            bucket.retain(|ts| now - ts < window);
            !bucket.is_empty()
        });
        let pruned = before - state.rate_buckets.len();
        if pruned > 0 {
            log::debug!("🧹 Pruned {} idle rate-limit buckets", pruned);
        }
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock().unwrap();
        QueueStatus {
            queued: state.queue.len(),
            active: state.active,
            max_concurrent: self.cfg.max_concurrent,
            max_queue_size: self.cfg.max_queue_size,
        }
    }

    /// Sliding-window admission timestamps currently counted against a user.
    pub fn user_requests(&self, user_id: &str) -> Vec<i64> {
        let now = (self.clock)();
        let window = self.cfg.rate_limit_window_ms as i64;
        let state = self.state.lock().unwrap();
        state
            .rate_buckets
            .get(user_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .copied()
                    .filter(|ts| now - ts < window)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Empty the queue, returning the number of removed items.
    pub fn clear_queue(&self) -> usize {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let removed = state.queue.len();
            state.queue.clear();
            removed
        };
        log::info!("🧹 Queue cleared ({} requests removed)", removed);
        let _ = self.signal_tx.send(QueueSignal::Cleared { removed });
        removed
    }

    /// Halt the scheduler loop. In-flight requests still resolve or time out
    /// independently.
    pub fn stop_processing(&self) {
        self.running.store(false, Ordering::Release);
        self.wake.notify_one();
    }
}

fn generate_request_id(now: i64) -> String {
    format!("req-{}-{:06x}", now, rand::random::<u32>() & 0xff_ffff)
}
