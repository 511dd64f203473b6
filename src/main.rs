//! chainping runtime - wires the pipeline together with in-memory
//! collaborators and a synthetic event source.
//!
//! Real deployments replace the synthetic source with the chain log poller
//! and the logging transport with the chat-bot send API; the pipeline itself
//! is identical.
//!
//! Environment variables are documented on the config structs (CHAINPING_*).

use {
    async_trait::async_trait,
    chainping::{
        aggregator::EventAggregator,
        collab::{LogTransport, MemoryEventStore, MemorySubscriberDirectory, SubscriberDirectory},
        config::BotConfig,
        error::ProbeError,
        event::{now_ms, ChainEvent, EventKind},
        health::{HealthMonitor, NetworkProbe, ProcessMemoryGauge, StoreProbe, TransportProbe},
        queue::{DispatchedRequest, NewRequest, RequestQueue},
    },
    rand::Rng,
    std::sync::Arc,
    tokio::{
        sync::mpsc,
        time::{interval, Duration},
    },
};

/// Probe that reads from the in-memory store (always reachable in-process).
struct MemoryStoreProbe;

#[async_trait]
impl StoreProbe for MemoryStoreProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Probe for the logging transport (always reachable in-process).
struct LogTransportProbe;

#[async_trait]
impl TransportProbe for LogTransportProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn restart(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

struct LoopbackNetworkProbe;

#[async_trait]
impl NetworkProbe for LoopbackNetworkProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BotConfig::from_env();

    log::info!("🚀 Starting chainping pipeline");
    log::info!("📊 Configuration:");
    log::info!(
        "   ├─ Queue: {} concurrent, {} max queued, {}ms timeout",
        config.queue.max_concurrent,
        config.queue.max_queue_size,
        config.queue.processing_timeout_ms
    );
    log::info!(
        "   ├─ Rate limit: {} per {}ms",
        config.queue.rate_limit_max,
        config.queue.rate_limit_window_ms
    );
    log::info!(
        "   ├─ Aggregator: {}ms interval, {} per batch, {}ms min gap",
        config.aggregator.broadcast_interval_ms,
        config.aggregator.max_events_per_batch,
        config.aggregator.min_broadcast_interval_ms
    );
    log::info!(
        "   └─ Health: {}ms checks, {} max failures",
        config.health.check_interval_ms,
        config.health.max_failures
    );

    // Collaborators. In-memory stand-ins for the document store and chat API.
    let directory = Arc::new(MemorySubscriberDirectory::new());
    let store = Arc::new(MemoryEventStore::new());
    let transport = Arc::new(LogTransport);
    directory.add("demo_chat").await?;

    // Request queue + command handler.
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<DispatchedRequest>(64);
    let queue = RequestQueue::new(config.queue.clone(), dispatch_tx);

    let queue_runner = queue.clone();
    tokio::spawn(async move { queue_runner.run().await });

    // Demo handler: resolves every command with an echo payload.
    tokio::spawn(async move {
        while let Some(dispatched) = dispatch_rx.recv().await {
            let reply = serde_json::json!({
                "request": dispatched.item.id,
                "kind": dispatched.item.kind,
            });
            let _ = dispatched.done.send(Ok(reply));
        }
    });

    // Event aggregator.
    let aggregator = EventAggregator::new(
        config.aggregator.clone(),
        directory.clone(),
        store.clone(),
        transport.clone(),
    );
    let aggregator_runner = aggregator.clone();
    tokio::spawn(async move { aggregator_runner.run().await });

    // Health monitor.
    let monitor = HealthMonitor::new(
        config.health.clone(),
        Arc::new(MemoryStoreProbe),
        Arc::new(LogTransportProbe),
        Arc::new(LoopbackNetworkProbe),
        Arc::new(ProcessMemoryGauge),
    );
    monitor.start();

    // Synthetic chain event source, replaced by the log poller in production.
    let event_aggregator = aggregator.clone();
    tokio::spawn(async move {
        let kinds = [
            EventKind::Transfer,
            EventKind::Approval,
            EventKind::Mint,
            EventKind::Burn,
        ];
        let mut tick = interval(Duration::from_secs(3));
        let mut block = 1_000u64;
        loop {
            tick.tick().await;
            block += 1;
            let event = {
                let mut rng = rand::thread_rng();
                ChainEvent {
                    kind: kinds[rng.gen_range(0..kinds.len())],
                    contract: format!("0x{:040x}", rng.gen::<u64>()),
                    tx_hash: format!("0x{:064x}", rng.gen::<u64>()),
                    block_number: block,
                    detail: format!("synthetic event at block {}", block),
                    timestamp: now_ms(),
                }
            };
            event_aggregator.add_event(event).await;
        }
    });

    // Periodic demo command so the queue has traffic.
    let command_queue = queue.clone();
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(10));
        loop {
            tick.tick().await;
            let result = command_queue.add_request(NewRequest {
                user_id: "demo_user".to_string(),
                kind: "status".to_string(),
                data: serde_json::json!({}),
                priority: 0,
            });
            if let Err(e) = result {
                log::warn!("⚠️  Demo command rejected: {}", e);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("🛑 Shutdown requested");

    queue.stop_processing();
    aggregator.stop();
    monitor.stop();

    let status = queue.status();
    log::info!(
        "   └─ Final queue status: {} queued, {} active",
        status.queued,
        status.active
    );

    Ok(())
}
