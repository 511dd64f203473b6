//! Chain event types shared across the pipeline.
//!
//! Events arrive from the log poller already decoded; the pipeline only cares
//! about their kind, origin, and a short human-readable detail line for digests.

use {
    serde::{Deserialize, Serialize},
    std::sync::Arc,
};

/// Millisecond clock function, injectable for deterministic tests.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Clock backed by system time.
pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Known chain log kinds tracked by the digest breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    Approval,
    Mint,
    Burn,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Transfer => "transfer",
            EventKind::Approval => "approval",
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
            EventKind::Other => "other",
        }
    }

    /// All kinds, in the order digests report them.
    pub fn all() -> [EventKind; 5] {
        [
            EventKind::Transfer,
            EventKind::Approval,
            EventKind::Mint,
            EventKind::Burn,
            EventKind::Other,
        ]
    }
}

/// A single decoded log event from the chain poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEvent {
    pub kind: EventKind,
    pub contract: String,
    pub tx_hash: String,
    pub block_number: u64,
    /// One-line human-readable description used in digest messages.
    pub detail: String,
    /// Unix millis at which the event was observed on-chain.
    pub timestamp: i64,
}

/// A chain event plus the time it entered the aggregation queue.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: ChainEvent,
    pub queued_at: i64,
}
