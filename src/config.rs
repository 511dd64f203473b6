//! Pipeline configuration from environment variables.
//!
//! Every bound and interval is constructor-time configuration with a typed
//! default; `from_env` overrides from `CHAINPING_*` variables.

use std::env;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Bounds and intervals for the request queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrency ceiling for in-flight requests.
    pub max_concurrent: usize,
    /// Admission bound on queued (not yet dispatched) requests.
    pub max_queue_size: usize,
    /// Per-request processing deadline in milliseconds.
    pub processing_timeout_ms: u64,
    /// Sliding rate-limit window in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Max admitted requests per user within the window.
    pub rate_limit_max: u32,
    /// Scheduler fallback poll tick in milliseconds.
    pub poll_interval_ms: u64,
    /// Rate-limit bucket pruning tick in milliseconds.
    pub maintenance_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 100,
            processing_timeout_ms: 30_000,
            rate_limit_window_ms: 60_000,
            rate_limit_max: 10,
            poll_interval_ms: 100,
            maintenance_interval_ms: 60_000,
        }
    }
}

impl QueueConfig {
    /// Environment variables:
    /// - `CHAINPING_MAX_CONCURRENT` (default: 3)
    /// - `CHAINPING_MAX_QUEUE_SIZE` (default: 100)
    /// - `CHAINPING_PROCESSING_TIMEOUT_MS` (default: 30000)
    /// - `CHAINPING_RATE_LIMIT_WINDOW_MS` (default: 60000)
    /// - `CHAINPING_RATE_LIMIT_MAX` (default: 10)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_concurrent: env_parse("CHAINPING_MAX_CONCURRENT", d.max_concurrent),
            max_queue_size: env_parse("CHAINPING_MAX_QUEUE_SIZE", d.max_queue_size),
            processing_timeout_ms: env_parse("CHAINPING_PROCESSING_TIMEOUT_MS", d.processing_timeout_ms),
            rate_limit_window_ms: env_parse("CHAINPING_RATE_LIMIT_WINDOW_MS", d.rate_limit_window_ms),
            rate_limit_max: env_parse("CHAINPING_RATE_LIMIT_MAX", d.rate_limit_max),
            poll_interval_ms: d.poll_interval_ms,
            maintenance_interval_ms: d.maintenance_interval_ms,
        }
    }
}

/// Batching and backpressure bounds for the event aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Timer-driven flush interval in milliseconds.
    pub broadcast_interval_ms: u64,
    /// Size threshold that triggers an immediate flush attempt; also the
    /// per-flush cap on events popped off the queue.
    pub max_events_per_batch: usize,
    /// Minimum gap between two broadcasts in milliseconds.
    pub min_broadcast_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: 60_000,
            max_events_per_batch: 10,
            min_broadcast_interval_ms: 10_000,
        }
    }
}

impl AggregatorConfig {
    /// Environment variables:
    /// - `CHAINPING_BROADCAST_INTERVAL_MS` (default: 60000)
    /// - `CHAINPING_MAX_EVENTS_PER_BATCH` (default: 10)
    /// - `CHAINPING_MIN_BROADCAST_INTERVAL_MS` (default: 10000)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            broadcast_interval_ms: env_parse("CHAINPING_BROADCAST_INTERVAL_MS", d.broadcast_interval_ms),
            max_events_per_batch: env_parse("CHAINPING_MAX_EVENTS_PER_BATCH", d.max_events_per_batch),
            min_broadcast_interval_ms: env_parse(
                "CHAINPING_MIN_BROADCAST_INTERVAL_MS",
                d.min_broadcast_interval_ms,
            ),
        }
    }
}

/// Probe cadence and failure thresholds for the health monitor.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Full probe interval in milliseconds.
    pub check_interval_ms: u64,
    /// Lighter memory-only probe interval in milliseconds.
    pub memory_check_interval_ms: u64,
    /// Consecutive failing probes before the system is marked unhealthy.
    pub max_failures: u32,
    /// Fixed wait after recovery steps before re-probing, in milliseconds.
    pub recovery_timeout_ms: u64,
    /// Heap usage ceiling in bytes for the memory check.
    pub memory_limit_bytes: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            memory_check_interval_ms: 10_000,
            max_failures: 3,
            recovery_timeout_ms: 5_000,
            memory_limit_bytes: 512 * 1024 * 1024,
        }
    }
}

impl HealthConfig {
    /// Environment variables:
    /// - `CHAINPING_HEALTH_CHECK_INTERVAL_MS` (default: 30000)
    /// - `CHAINPING_MEMORY_CHECK_INTERVAL_MS` (default: 10000)
    /// - `CHAINPING_MAX_FAILURES` (default: 3)
    /// - `CHAINPING_RECOVERY_TIMEOUT_MS` (default: 5000)
    /// - `CHAINPING_MEMORY_LIMIT_BYTES` (default: 536870912)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            check_interval_ms: env_parse("CHAINPING_HEALTH_CHECK_INTERVAL_MS", d.check_interval_ms),
            memory_check_interval_ms: env_parse(
                "CHAINPING_MEMORY_CHECK_INTERVAL_MS",
                d.memory_check_interval_ms,
            ),
            max_failures: env_parse("CHAINPING_MAX_FAILURES", d.max_failures),
            recovery_timeout_ms: env_parse("CHAINPING_RECOVERY_TIMEOUT_MS", d.recovery_timeout_ms),
            memory_limit_bytes: env_parse("CHAINPING_MEMORY_LIMIT_BYTES", d.memory_limit_bytes),
        }
    }
}

/// Top-level configuration for the runtime binary.
#[derive(Debug, Clone, Default)]
pub struct BotConfig {
    pub queue: QueueConfig,
    pub aggregator: AggregatorConfig,
    pub health: HealthConfig,
}

impl BotConfig {
    pub fn from_env() -> Self {
        Self {
            queue: QueueConfig::from_env(),
            aggregator: AggregatorConfig::from_env(),
            health: HealthConfig::from_env(),
        }
    }
}
