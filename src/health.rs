//! Health monitor - periodic liveness probing and automatic recovery.
//!
//! Probes four independent conditions (event store, chat transport, chain
//! network, process memory headroom) on a fixed interval, plus a lighter
//! memory-only probe on a shorter one. Consecutive fully-or-partially failing
//! cycles past the configured threshold mark the system unhealthy and drive
//! one recovery attempt: reconnect/restart whichever subsystem failed, ask
//! for a memory reclamation pass, wait, re-probe. The probe loop never
//! propagates errors; every probe-level failure folds into a failed flag.

use {
    crate::config::HealthConfig,
    crate::error::ProbeError,
    crate::event::{system_clock, Clock},
    async_trait::async_trait,
    serde::Serialize,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    tokio::time::{interval, sleep, Duration, Instant},
};

/// Liveness of the persistence layer (a trivial read), plus reconnection.
#[async_trait]
pub trait StoreProbe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;
    async fn reconnect(&self) -> Result<(), ProbeError>;
}

/// Liveness of the chat transport (an identity/ping call), plus restart.
#[async_trait]
pub trait TransportProbe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;
    async fn restart(&self) -> Result<(), ProbeError>;
}

/// Liveness of the chain network connection.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Process memory readings and a best-effort reclamation hook.
pub trait MemoryGauge: Send + Sync {
    fn used_bytes(&self) -> u64;
    fn reclaim(&self);
}

/// Per-cycle snapshot of subsystem health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub store_ok: bool,
    pub transport_ok: bool,
    pub network_ok: bool,
    pub memory_ok: bool,
    pub failure_count: u32,
    pub is_healthy: bool,
    pub last_check_ms: Option<i64>,
    pub check_duration_ms: u64,
    pub uptime_secs: u64,
}

impl HealthSnapshot {
    pub fn all_ok(&self) -> bool {
        self.store_ok && self.transport_ok && self.network_ok && self.memory_ok
    }
}

/// Static process/host information for operator reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub uptime_secs: u64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub platform: &'static str,
    pub arch: &'static str,
}

/// Observer signals raised by the monitor.
#[derive(Debug, Clone)]
pub enum HealthSignal {
    Check(HealthSnapshot),
    Critical(HealthSnapshot),
    Restored,
    RecoveryStarted,
    RecoveryCompleted,
    RecoveryFailed(String),
    MemoryUsage { used_bytes: u64, limit_bytes: u64 },
}

struct HealthState {
    store_ok: bool,
    transport_ok: bool,
    network_ok: bool,
    memory_ok: bool,
    failure_count: u32,
    is_healthy: bool,
    last_check_ms: Option<i64>,
    check_duration_ms: u64,
}

/// Periodic health prober with automatic recovery orchestration.
/// Cheap to clone; state is shared behind `Arc`.
#[derive(Clone)]
pub struct HealthMonitor {
    cfg: HealthConfig,
    store: Arc<dyn StoreProbe>,
    transport: Arc<dyn TransportProbe>,
    network: Arc<dyn NetworkProbe>,
    memory: Arc<dyn MemoryGauge>,
    state: Arc<Mutex<HealthState>>,
    signal_tx: tokio::sync::broadcast::Sender<HealthSignal>,
    started: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    started_at: Instant,
    clock: Clock,
}

impl HealthMonitor {
    pub fn new(
        cfg: HealthConfig,
        store: Arc<dyn StoreProbe>,
        transport: Arc<dyn TransportProbe>,
        network: Arc<dyn NetworkProbe>,
        memory: Arc<dyn MemoryGauge>,
    ) -> Self {
        let (signal_tx, _) = tokio::sync::broadcast::channel(64);
        Self {
            cfg,
            store,
            transport,
            network,
            memory,
            state: Arc::new(Mutex::new(HealthState {
                store_ok: true,
                transport_ok: true,
                network_ok: true,
                memory_ok: true,
                failure_count: 0,
                is_healthy: true,
                last_check_ms: None,
                check_duration_ms: 0,
            })),
            signal_tx,
            started: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
            started_at: Instant::now(),
            clock: system_clock(),
        }
    }

    /// Subscribe to health signals.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HealthSignal> {
        self.signal_tx.subscribe()
    }

    /// Begin the full-probe and memory-probe loops. Safe to call more than
    /// once; only the first call spawns.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!(
            "🩺 Health monitor started (check: {}ms, memory: {}ms, max failures: {})",
            self.cfg.check_interval_ms,
            self.cfg.memory_check_interval_ms,
            self.cfg.max_failures
        );

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(monitor.cfg.check_interval_ms));
            tick.tick().await;
            while monitor.running.load(Ordering::Acquire) {
                tick.tick().await;
                if !monitor.running.load(Ordering::Acquire) {
                    break;
                }
                monitor.probe_cycle().await;
            }
        });

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(monitor.cfg.memory_check_interval_ms));
            tick.tick().await;
            while monitor.running.load(Ordering::Acquire) {
                tick.tick().await;
                if !monitor.running.load(Ordering::Acquire) {
                    break;
                }
                monitor.memory_probe();
            }
        });
    }

    /// Halt future probe ticks. In-flight probes resolve independently.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        log::info!("✅ Health monitor stopped");
    }

    /// One full probe; drives recovery when the failure threshold is reached.
    /// Returns the snapshot taken before any recovery attempt.
    async fn probe_cycle(&self) -> HealthSnapshot {
        let snapshot = self.probe_once().await;
        if !snapshot.all_ok() && snapshot.failure_count >= self.cfg.max_failures {
            log::error!(
                "🚨 Health critical after {} consecutive failures",
                snapshot.failure_count
            );
            let _ = self.signal_tx.send(HealthSignal::Critical(snapshot.clone()));
            self.recover(&snapshot).await;
        }
        snapshot
    }

    /// Run the four independent checks and fold the results into the shared
    /// state. Never triggers recovery (callers decide that).
    async fn probe_once(&self) -> HealthSnapshot {
        let started = Instant::now();

        // Each check is independent; one failing does not short-circuit the
        // rest, and check errors fold into a failed flag.
        let store_ok = match self.store.check().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("⚠️  Store probe failed: {}", e);
                false
            }
        };
        let transport_ok = match self.transport.check().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("⚠️  Transport probe failed: {}", e);
                false
            }
        };
        let network_ok = match self.network.check().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("⚠️  Network probe failed: {}", e);
                false
            }
        };
        let used = self.memory.used_bytes();
        let memory_ok = used < self.cfg.memory_limit_bytes;
        if !memory_ok {
            log::warn!(
                "⚠️  Memory over limit: {} / {} bytes",
                used,
                self.cfg.memory_limit_bytes
            );
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let all_ok = store_ok && transport_ok && network_ok && memory_ok;

        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.store_ok = store_ok;
            state.transport_ok = transport_ok;
            state.network_ok = network_ok;
            state.memory_ok = memory_ok;
            state.last_check_ms = Some((self.clock)());
            state.check_duration_ms = duration_ms;

            if all_ok {
                state.failure_count = 0;
                if !state.is_healthy {
                    state.is_healthy = true;
                    log::info!("💚 Health restored");
                    let _ = self.signal_tx.send(HealthSignal::Restored);
                }
            } else {
                state.failure_count += 1;
                if state.failure_count >= self.cfg.max_failures {
                    state.is_healthy = false;
                }
            }

            self.snapshot_locked(&state)
        };

        let _ = self.signal_tx.send(HealthSignal::Check(snapshot.clone()));
        snapshot
    }

    /// One recovery attempt targeting whichever subsystems were failing.
    async fn recover(&self, snapshot: &HealthSnapshot) {
        let _ = self.signal_tx.send(HealthSignal::RecoveryStarted);
        log::info!("🔧 Recovery started");

        let result: Result<(), ProbeError> = async {
            if !snapshot.store_ok {
                log::info!("   ├─ Reconnecting store");
                self.store.reconnect().await?;
            }
            if !snapshot.transport_ok {
                log::info!("   ├─ Restarting transport");
                self.transport.restart().await?;
            }
            self.memory.reclaim();
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                sleep(Duration::from_millis(self.cfg.recovery_timeout_ms)).await;
                let after = self.probe_once().await;
                log::info!(
                    "🔧 Recovery completed (healthy: {})",
                    after.all_ok()
                );
                let _ = self.signal_tx.send(HealthSignal::RecoveryCompleted);
            }
            Err(e) => {
                log::error!("❌ Recovery failed: {}", e);
                let _ = self
                    .signal_tx
                    .send(HealthSignal::RecoveryFailed(e.to_string()));
            }
        }
    }

    /// Memory-only probe; emits a usage signal without touching the failure
    /// counter.
    fn memory_probe(&self) {
        let used = self.memory.used_bytes();
        if used >= self.cfg.memory_limit_bytes {
            log::warn!(
                "⚠️  Memory usage high: {} / {} bytes",
                used,
                self.cfg.memory_limit_bytes
            );
        }
        let _ = self.signal_tx.send(HealthSignal::MemoryUsage {
            used_bytes: used,
            limit_bytes: self.cfg.memory_limit_bytes,
        });
    }

    /// Synchronously run one probe cycle and return the snapshot
    /// (operator tooling). Forced cycles count toward the failure threshold
    /// and drive the same critical/recovery branch as the timer loop.
    pub async fn force_health_check(&self) -> HealthSnapshot {
        self.probe_cycle().await
    }

    pub fn health_status(&self) -> HealthSnapshot {
        let state = self.state.lock().unwrap();
        self.snapshot_locked(&state)
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            uptime_secs: self.started_at.elapsed().as_secs(),
            memory_used_bytes: self.memory.used_bytes(),
            memory_limit_bytes: self.cfg.memory_limit_bytes,
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }

    fn snapshot_locked(&self, state: &HealthState) -> HealthSnapshot {
        HealthSnapshot {
            store_ok: state.store_ok,
            transport_ok: state.transport_ok,
            network_ok: state.network_ok,
            memory_ok: state.memory_ok,
            failure_count: state.failure_count,
            is_healthy: state.is_healthy,
            last_check_ms: state.last_check_ms,
            check_duration_ms: state.check_duration_ms,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Gauge reading the process resident set from /proc on Linux; other
/// platforms report zero usage. Reclaim is a hook for cache-dropping
/// collaborators and only logs here.
pub struct ProcessMemoryGauge;

impl MemoryGauge for ProcessMemoryGauge {
    fn used_bytes(&self) -> u64 {
        read_rss_bytes().unwrap_or(0)
    }

    fn reclaim(&self) {
        log::info!("🧹 Memory reclamation requested");
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes() -> Option<u64> {
    None
}
