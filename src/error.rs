//! Error types for the admission and delivery pipeline.
//!
//! Admission errors are returned synchronously to the caller of
//! `RequestQueue::add_request` and map to distinct user-facing messages.
//! Transport and store errors are transient by definition; the permanent
//! "recipient gone" case is modelled as a success variant of the transport
//! send outcome, not an error (see `collab::SendOutcome`).

use thiserror::Error;

/// Synchronous rejection at request intake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("rate limit exceeded: max {max} requests per {window_ms}ms")]
    RateLimitExceeded { max: u32, window_ms: u64 },

    #[error("queue is full ({size} requests pending), try again later")]
    QueueFull { size: usize },
}

/// Transient failure from the message transport. Recipient-gone failures are
/// classified at the transport boundary and reported via `SendOutcome`.
#[derive(Debug, Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Failure from the subscriber directory or event store.
#[derive(Debug, Error)]
#[error("store failure: {0}")]
pub struct StoreError(pub String);

/// Failure from a health probe or a recovery step.
#[derive(Debug, Error)]
#[error("probe failure: {0}")]
pub struct ProbeError(pub String);
