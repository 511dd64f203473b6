//! Collaborator seams consumed by the pipeline.
//!
//! The subscriber directory, event store, and message transport are external
//! systems (document store, chat-bot API); the pipeline only sees these traits.
//! In-memory implementations back the runtime binary and tests.

use {
    crate::error::{StoreError, TransportError},
    crate::event::ChainEvent,
    async_trait::async_trait,
    std::sync::Mutex,
};

/// Outcome of a successful transport round trip.
///
/// `RecipientGone` is a delivery classified as permanently undeliverable
/// (chat deleted, bot blocked, account deactivated); the caller is expected
/// to drop the subscriber. Transient failures surface as `TransportError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    RecipientGone,
}

/// Directory of chat recipients subscribed to event digests.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Returns true if the subscriber was newly added.
    async fn add(&self, id: &str) -> Result<bool, StoreError>;

    /// Returns true if the subscriber existed and was removed.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;
}

/// Append-only store of observed chain events; `list_all` feeds the
/// all-time section of digest messages.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: ChainEvent) -> Result<(), StoreError>;

    async fn list_all(&self) -> Result<Vec<ChainEvent>, StoreError>;
}

/// Outbound message delivery (the chat-bot send API).
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<SendOutcome, TransportError>;
}

/// In-memory subscriber directory. Preserves insertion order, rejects
/// duplicates.
#[derive(Default)]
pub struct MemorySubscriberDirectory {
    subscribers: Mutex<Vec<String>>,
}

impl MemorySubscriberDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriberDirectory for MemorySubscriberDirectory {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.subscribers.lock().unwrap().clone())
    }

    async fn add(&self, id: &str) -> Result<bool, StoreError> {
        let mut subs = self.subscribers.lock().unwrap();
        if subs.iter().any(|s| s == id) {
            return Ok(false);
        }
        subs.push(id.to_string());
        Ok(true)
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut subs = self.subscribers.lock().unwrap();
        let before = subs.len();
        subs.retain(|s| s != id);
        Ok(subs.len() < before)
    }
}

/// In-memory append-only event store.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<ChainEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: ChainEvent) -> Result<(), StoreError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ChainEvent>, StoreError> {
        Ok(self.events.lock().unwrap().clone())
    }
}

/// Transport that writes messages to the log instead of a chat API.
/// Used by the runtime binary when no real bot token is configured.
pub struct LogTransport;

#[async_trait]
impl MessageTransport for LogTransport {
    async fn send(&self, recipient: &str, text: &str) -> Result<SendOutcome, TransportError> {
        log::info!("📨 -> {}: {}", recipient, text.replace('\n', " | "));
        Ok(SendOutcome::Delivered)
    }
}
