//! The poll engine: scan loop, sweeps, and administration.
//!
//! One `PollEngine` instance serves one channel class — the gateway that
//! composes the process owns one for the serial bus and one for the
//! network, each constructed with its own backoff and pool parameters.
//! There is no global registry; instances are passed by handle.
//!
//! The scan loop is single-threaded with respect to polling: it cycles
//! over the device set with a short constant pause between passes, so a
//! blocked read delays only the next scheduling check, never another
//! engine. The recovery sweep, the pool sweep, and the configuration
//! watcher run as independent tasks and share the per-device state
//! through one lock, held only for lookup/mutation — never across I/O.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backoff::BackoffConfig;
use super::batch::BatchCoordinator;
use super::failure::{DisableReason, FailurePolicy, FailureTracker};
use super::metrics::MetricsRegistry;
use super::pool::{ConnectionPool, PoolConfig};
use super::scheduler::DeviceScheduler;
use super::status::{CycleStats, DeviceStatus, EngineStatus};
use crate::core::config::{ConfigProvider, MemoryPressure};
use crate::core::device::{ChannelClass, DeviceDescriptor, DeviceId};
use crate::core::error::{EngineError, Result};
use crate::core::metadata::EnginePreset;
use crate::core::sink::{ReadingRecord, SinkItem, TelemetrySink};
use crate::core::transport::{ConnectionHandle, Connector, ReadOutcome, Transport};

/// Parameters of one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Instance name for logs and status.
    pub name: String,
    /// Channel class this instance serves.
    pub channel_class: ChannelClass,
    /// Constant pause between scan passes.
    pub scan_pause: Duration,
    /// Bound on each transport read.
    pub transport_timeout: Duration,
    /// Failure/timeout ceilings and backoff parameters.
    pub failure: FailurePolicy,
    /// Period of the auto-recovery sweep.
    pub recovery_sweep_period: Duration,
    /// Pool parameters (networked engines).
    pub pool: PoolConfig,
    /// Period of the pool sweep (networked engines).
    pub pool_sweep_period: Duration,
}

impl EngineConfig {
    /// Configuration for a serial-bus engine.
    pub fn serial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_class: ChannelClass::SerialBus,
            scan_pause: Duration::from_millis(100),
            transport_timeout: Duration::from_secs(3),
            failure: FailurePolicy::new(BackoffConfig::serial()),
            recovery_sweep_period: Duration::from_secs(300),
            pool: PoolConfig::default(),
            pool_sweep_period: Duration::from_secs(15),
        }
    }

    /// Configuration for a network engine.
    pub fn network(name: impl Into<String>) -> Self {
        Self {
            channel_class: ChannelClass::Network,
            failure: FailurePolicy::new(BackoffConfig::network()),
            ..Self::serial(name)
        }
    }

    /// Configuration from a preset in the metadata registry.
    pub fn from_preset(preset: &EnginePreset, name: impl Into<String>) -> Self {
        let base = match preset.class {
            ChannelClass::SerialBus => Self::serial(name),
            ChannelClass::Network => Self::network(name),
        };
        Self {
            scan_pause: Duration::from_millis(preset.scan_pause_ms),
            transport_timeout: Duration::from_millis(preset.transport_timeout_ms),
            failure: FailurePolicy::new(BackoffConfig::new(
                preset.backoff_base_ms,
                preset.backoff_max_ms,
            )),
            pool: match preset.pool_capacity {
                Some(cap) => PoolConfig::default().with_capacity(cap),
                None => PoolConfig::default(),
            },
            ..base
        }
    }

    /// Override the scan pause.
    #[must_use]
    pub fn with_scan_pause(mut self, pause: Duration) -> Self {
        self.scan_pause = pause;
        self
    }

    /// Override the transport timeout.
    #[must_use]
    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    /// Override the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    /// Override the recovery-sweep period.
    #[must_use]
    pub fn with_recovery_sweep_period(mut self, period: Duration) -> Self {
        self.recovery_sweep_period = period;
        self
    }

    /// Override the pool parameters.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// Per-device collections guarded by the engine state lock. All of them
/// are rebuilt together with the device set.
struct EngineState {
    devices: Vec<DeviceDescriptor>,
    scheduler: DeviceScheduler,
    failures: FailureTracker,
    metrics: MetricsRegistry,
    batches: BatchCoordinator,
    cycles: CycleStats,
}

impl EngineState {
    fn new(policy: FailurePolicy) -> Self {
        Self {
            devices: Vec::new(),
            scheduler: DeviceScheduler::new(),
            failures: FailureTracker::new(policy),
            metrics: MetricsRegistry::new(),
            batches: BatchCoordinator::new(),
            cycles: CycleStats::default(),
        }
    }
}

/// Poll-scheduling engine for one channel class.
pub struct PollEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn TelemetrySink>,
    provider: Arc<dyn ConfigProvider>,
    memory: Arc<dyn MemoryPressure>,
    pool: Option<ConnectionPool>,
    state: Mutex<EngineState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PollEngine {
    /// Create an engine and load the initial device list.
    ///
    /// Network engines require a connector for the pool; serial engines
    /// ignore it.
    pub async fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn TelemetrySink>,
        provider: Arc<dyn ConfigProvider>,
        memory: Arc<dyn MemoryPressure>,
        connector: Option<Arc<dyn Connector>>,
    ) -> Result<Arc<Self>> {
        let pool = match (config.channel_class, connector) {
            (ChannelClass::Network, Some(c)) => Some(ConnectionPool::new(config.pool, c)),
            (ChannelClass::Network, None) => {
                return Err(EngineError::config(
                    "network engine requires a connector for its pool",
                ))
            }
            (ChannelClass::SerialBus, _) => None,
        };

        let (shutdown_tx, _) = watch::channel(false);
        let failure = config.failure;
        let engine = Arc::new(Self {
            config,
            transport,
            sink,
            provider,
            memory,
            pool,
            state: Mutex::new(EngineState::new(failure)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });
        engine.rebuild_devices().await?;
        Ok(engine)
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state lock poisoned")
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rebuild the device set from the configuration provider.
    ///
    /// Always a full rebuild: descriptors of the wrong channel class and
    /// invalid descriptors are dropped with a log line, the four
    /// per-device collections are replaced together, and every pooled
    /// connection is closed so stale endpoint mappings never linger.
    pub async fn rebuild_devices(&self) -> Result<()> {
        let list = self.provider.device_list().await?;
        let mut accepted: Vec<DeviceDescriptor> = Vec::with_capacity(list.len());
        for dev in list {
            if dev.channel.class() != self.config.channel_class {
                debug!(device = %dev.id, class = %dev.channel.class(), "skipping device of another channel class");
                continue;
            }
            if let Err(e) = dev.validate() {
                warn!(device = %dev.id, error = %e, "rejecting invalid device descriptor");
                continue;
            }
            accepted.push(dev);
        }

        {
            let mut st = self.lock_state();
            let ids: Vec<DeviceId> = accepted.iter().map(|d| d.id).collect();
            st.scheduler.clear();
            st.failures.rebuild(ids.iter().copied());
            st.metrics.rebuild(ids.iter().copied());
            st.batches.clear();
            for dev in &accepted {
                if !dev.enabled {
                    st.failures.disable(
                        dev.id,
                        DisableReason::Manual,
                        Some("disabled in configuration".into()),
                    );
                }
            }
            st.devices = accepted;
            info!(
                engine = %self.config.name,
                devices = st.devices.len(),
                "device list rebuilt"
            );
        }

        if let Some(pool) = &self.pool {
            pool.close_all().await;
        }
        Ok(())
    }

    /// One pass over the device set: poll every device that is enabled,
    /// due, and not waiting out a backoff delay.
    async fn scan_pass(&self) {
        let pass_start = Instant::now();

        let candidates: Vec<DeviceDescriptor> = {
            let mut st = self.lock_state();
            let devices = st.devices.clone();
            devices
                .into_iter()
                .filter(|d| {
                    if !st.failures.is_enabled(d.id) {
                        return false;
                    }
                    if !st.scheduler.is_due(d.id, d.interval()) {
                        return false;
                    }
                    !st.failures.in_backoff(d.id) || st.failures.should_retry(d.id)
                })
                .collect()
        };

        for dev in candidates {
            if *self.shutdown_tx.borrow() {
                break;
            }
            self.poll_device(&dev).await;
        }

        let mut st = self.lock_state();
        st.cycles.scan_passes += 1;
        st.cycles.last_pass_ms = pass_start.elapsed().as_millis() as u64;
    }

    /// Poll one device: acquire a connection (networked), read every
    /// register request in order, record outcomes, emit the batch marker,
    /// release the connection.
    async fn poll_device(&self, dev: &DeviceDescriptor) {
        let id = dev.id;
        {
            let mut st = self.lock_state();
            st.scheduler.mark_attempted(id);
            st.cycles.attempts += 1;
        }

        let endpoint = dev.channel.endpoint();
        let conn: Option<ConnectionHandle> = match (&self.pool, &endpoint) {
            (Some(pool), Some(ep)) => match pool.acquire(ep).await {
                Some(h) => Some(h),
                None => {
                    // A failed acquire is a read failure for this attempt.
                    // No batch starts, so no stale marker can linger.
                    warn!(engine = %self.config.name, device = %id, endpoint = %ep, "connection acquire failed");
                    let mut st = self.lock_state();
                    st.metrics.record_read(id, false, 0);
                    st.cycles.failed_cycles += 1;
                    if st.failures.on_read_failure(id) {
                        warn!(device = %id, "device auto-disabled after exhausting retries");
                    }
                    return;
                }
            },
            _ => None,
        };

        let expected = dev.registers.len() as u32;
        self.lock_state().batches.start_batch(id, expected);

        let mut any_timeout = false;
        let mut any_failure = false;

        for request in &dev.registers {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.config.transport_timeout,
                self.transport.read_once(&dev.channel, request, conn.as_ref()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => ReadOutcome::Timeout,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                ReadOutcome::Values(values) => {
                    let record = ReadingRecord {
                        device_id: id,
                        request: *request,
                        values,
                        timestamp: chrono::Utc::now(),
                    };
                    let enqueued = self.sink.enqueue(SinkItem::Reading(record));
                    let rejected = enqueued.is_err();
                    {
                        let mut st = self.lock_state();
                        st.metrics.record_read(id, true, elapsed_ms);
                        st.cycles.registers_read += 1;
                        // A rejected enqueue counts against the batch, not
                        // the device: the device answered fine.
                        st.batches.record_register_result(id, !rejected);
                    }
                    if rejected {
                        warn!(device = %id, "downstream queue rejected reading");
                        self.memory
                            .report_exhaustion("downstream queue rejected reading");
                    }
                }
                ReadOutcome::Timeout => {
                    debug!(device = %id, function = request.function, start = request.start, "register read timed out");
                    {
                        let mut st = self.lock_state();
                        st.metrics.record_read(id, false, 0);
                        st.batches.record_register_result(id, false);
                    }
                    any_timeout = true;
                    // The device is not answering; the rest of the cycle
                    // would only stack further timeouts.
                    break;
                }
                ReadOutcome::ProtocolError(msg) => {
                    debug!(device = %id, error = %msg, "register read failed");
                    let mut st = self.lock_state();
                    st.metrics.record_read(id, false, 0);
                    st.batches.record_register_result(id, false);
                    any_failure = true;
                }
            }
        }

        // One marker per started cycle, complete or abandoned.
        let marker = self.lock_state().batches.end_batch(id);
        if let Some(marker) = marker {
            if self.sink.enqueue(SinkItem::BatchEnd(marker)).is_err() {
                error!(device = %id, "downstream queue rejected batch marker");
                self.memory
                    .report_exhaustion("downstream queue rejected batch marker");
            }
        }

        // The state machine moves once per attempt.
        {
            let mut st = self.lock_state();
            if any_timeout {
                st.cycles.failed_cycles += 1;
                if st.failures.on_read_timeout(id) {
                    warn!(device = %id, "device auto-disabled after consecutive timeouts");
                }
            } else if any_failure {
                st.cycles.failed_cycles += 1;
                if st.failures.on_read_failure(id) {
                    warn!(device = %id, "device auto-disabled after exhausting retries");
                }
            } else {
                st.cycles.successful_cycles += 1;
                st.failures.on_read_success(id);
            }
        }

        if let (Some(pool), Some(ep), Some(handle)) = (&self.pool, &endpoint, &conn) {
            pool.release(ep, handle, !any_timeout && !any_failure).await;
        }
    }

    /// Re-enable every auto-disabled device. Invoked by the sweep task on
    /// its period; also callable directly (administrative surface, tests).
    pub fn run_recovery_sweep(&self) -> Vec<DeviceId> {
        let reenabled = self.lock_state().failures.recovery_sweep();
        for id in &reenabled {
            info!(device = %id, "auto-disabled device re-enabled by recovery sweep");
        }
        reenabled
    }

    /// Start the scan loop, recovery sweep, pool sweep (networked), and
    /// configuration watcher. Idempotent while running.
    pub fn spawn(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        if !tasks.is_empty() {
            return;
        }

        let engine = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut shutdown = engine.shutdown_tx.subscribe();
            info!(engine = %engine.config.name, class = %engine.config.channel_class, "scan loop started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                engine.scan_pass().await;
                tokio::select! {
                    _ = tokio::time::sleep(engine.config.scan_pause) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!(engine = %engine.config.name, "scan loop stopped");
        }));

        let engine = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut shutdown = engine.shutdown_tx.subscribe();
            let mut ticker = tokio::time::interval(engine.config.recovery_sweep_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.run_recovery_sweep();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));

        if self.pool.is_some() {
            let engine = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut shutdown = engine.shutdown_tx.subscribe();
                let mut ticker = tokio::time::interval(engine.config.pool_sweep_period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Some(pool) = &engine.pool {
                                pool.sweep(engine.memory.is_low()).await;
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        let engine = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut shutdown = engine.shutdown_tx.subscribe();
            let notify = engine.provider.changed();
            loop {
                tokio::select! {
                    _ = notify.notified() => {
                        if let Err(e) = engine.rebuild_devices().await {
                            error!(engine = %engine.config.name, error = %e, "device-list rebuild failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    /// Stop the loops, let the in-flight read finish or time out, then
    /// close every pooled connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("task list lock poisoned");
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        if let Some(pool) = &self.pool {
            pool.close_all().await;
        }
        info!(engine = %self.config.name, "engine shut down");
    }

    /// Re-enable a device and optionally clear its health metrics.
    pub fn enable_device(&self, id: DeviceId, clear_metrics: bool) -> Result<()> {
        let mut st = self.lock_state();
        if !st.failures.contains(id) {
            return Err(EngineError::DeviceNotFound(id));
        }
        st.failures.enable(id);
        if clear_metrics {
            st.metrics.clear(id);
        }
        info!(device = %id, clear_metrics, "device enabled");
        Ok(())
    }

    /// Manually disable a device. Only `enable_device` brings it back —
    /// the recovery sweep never touches manual disables.
    pub fn disable_device(&self, id: DeviceId, detail: impl Into<String>) -> Result<()> {
        let mut st = self.lock_state();
        if !st.failures.contains(id) {
            return Err(EngineError::DeviceNotFound(id));
        }
        st.failures
            .disable(id, DisableReason::Manual, Some(detail.into()));
        info!(device = %id, "device disabled");
        Ok(())
    }

    /// Status of one device.
    pub fn device_status(&self, id: DeviceId) -> Result<DeviceStatus> {
        let st = self.lock_state();
        Self::build_status(&st, id).ok_or(EngineError::DeviceNotFound(id))
    }

    /// Aggregate status: every device plus engine-level counters.
    pub fn status(&self) -> EngineStatus {
        let st = self.lock_state();
        let devices: Vec<DeviceStatus> = st
            .devices
            .iter()
            .filter_map(|d| Self::build_status(&st, d.id))
            .collect();
        EngineStatus {
            channel_class: self.config.channel_class,
            device_count: st.devices.len(),
            devices,
            cycles: st.cycles,
            pool: self.pool.as_ref().map(|p| p.stats()),
            pool_entries: self.pool.as_ref().map(|p| p.len()),
            extra: serde_json::json!({
                "engine": self.config.name,
                "scan_pause_ms": self.config.scan_pause.as_millis() as u64,
                "transport_timeout_ms": self.config.transport_timeout.as_millis() as u64,
            }),
        }
    }

    fn build_status(st: &EngineState, id: DeviceId) -> Option<DeviceStatus> {
        let dev = st.devices.iter().find(|d| d.id == id)?;
        let (f, t) = st.failures.get(id)?;
        let metrics = st.metrics.get(id)?.snapshot();
        Some(DeviceStatus {
            id,
            name: dev.name.clone(),
            enabled: f.is_enabled,
            consecutive_failures: f.consecutive_failures,
            retry_count: f.retry_count,
            consecutive_timeouts: t.consecutive_timeouts,
            disable_reason: f.disable_reason,
            disable_reason_detail: f.disable_reason_detail.clone(),
            disabled_for_secs: f
                .disabled_at
                .map(|at| (chrono::Utc::now() - at).num_seconds()),
            last_success_at: f.last_success_at,
            metrics,
        })
    }
}
