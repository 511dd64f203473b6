//! chainping - the asynchronous work-admission and delivery pipeline of a
//! chain event notification bot.
//!
//! Three collaborating components:
//! - [`queue::RequestQueue`]: admission control and priority scheduling of
//!   inbound user commands.
//! - [`aggregator::EventAggregator`]: batching of raw chain events into
//!   periodic digest broadcasts under backpressure constraints.
//! - [`health::HealthMonitor`]: liveness probing of dependent subsystems and
//!   automatic recovery after consecutive failures.
//!
//! Everything else (command parsing, REST surface, real persistence, the
//! chain log poller, UI) lives outside this crate and is reached through the
//! collaborator traits in [`collab`] and [`health`].

pub mod aggregator;
pub mod collab;
pub mod config;
pub mod digest;
pub mod error;
pub mod event;
pub mod health;
pub mod queue;

pub use aggregator::{AggregatorStatus, EventAggregator};
pub use collab::{
    EventStore, MemoryEventStore, MemorySubscriberDirectory, MessageTransport, SendOutcome,
    SubscriberDirectory,
};
pub use config::{AggregatorConfig, BotConfig, HealthConfig, QueueConfig};
pub use error::AdmissionError;
pub use event::{ChainEvent, EventKind};
pub use health::{HealthMonitor, HealthSnapshot, SystemInfo};
pub use queue::{DispatchedRequest, NewRequest, QueueSignal, QueueStatus, RequestQueue};
