//! Poll engine demo - runs a network-class engine against a simulated
//! transport.
//!
//! Three simulated devices: one healthy, one that answers slowly, and one
//! that stops responding after a few cycles (watch it back off, get
//! auto-disabled, and come back through the recovery sweep).
//!
//! # Run
//!
//! ```bash
//! cargo run --example poll_demo
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use pollcore::prelude::*;

// ============================================================================
// Simulated transport
// ============================================================================

/// A pretend field network: device behavior keyed by host.
struct SimTransport {
    reads: AtomicU64,
}

#[async_trait]
impl Transport for SimTransport {
    async fn read_once(
        &self,
        channel: &ChannelDescriptor,
        request: &RegisterRequest,
        _conn: Option<&ConnectionHandle>,
    ) -> ReadOutcome {
        let n = self.reads.fetch_add(1, Ordering::Relaxed);

        let host = match channel {
            ChannelDescriptor::Network { host, .. } => host.as_str(),
            ChannelDescriptor::Serial { .. } => return ReadOutcome::Timeout,
        };

        match host {
            // Healthy meter: answers promptly.
            "10.0.0.1" => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ReadOutcome::Values(simulated_words(request, n))
            }
            // Slow inverter: answers, but takes a while.
            "10.0.0.2" => {
                tokio::time::sleep(Duration::from_millis(120)).await;
                ReadOutcome::Values(simulated_words(request, n))
            }
            // Flaky sensor: drops off the network after ~20 reads.
            "10.0.0.3" => {
                if n < 20 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ReadOutcome::Values(simulated_words(request, n))
                } else {
                    ReadOutcome::Timeout
                }
            }
            _ => ReadOutcome::ProtocolError("unknown host".into()),
        }
    }
}

fn simulated_words(request: &RegisterRequest, seed: u64) -> Vec<u16> {
    (0..request.count)
        .map(|i| (seed as u16).wrapping_mul(31).wrapping_add(request.start + i))
        .collect()
}

struct SimConn;

#[async_trait]
impl Connection for SimConn {
    async fn close(&self) {}
}

struct SimConnector;

#[async_trait]
impl Connector for SimConnector {
    async fn open(&self, endpoint: &str) -> Result<ConnectionHandle> {
        info!(endpoint, "sim connector opened");
        Ok(Arc::new(SimConn) as ConnectionHandle)
    }
}

// ============================================================================
// Main
// ============================================================================

fn devices() -> Vec<DeviceDescriptor> {
    vec![
        DeviceDescriptor::new(
            1,
            "Meter",
            ChannelDescriptor::Network {
                host: "10.0.0.1".into(),
                port: 502,
            },
        )
        .with_interval_ms(500)
        .with_registers(vec![
            RegisterRequest::new(3, 0, 4),
            RegisterRequest::new(3, 100, 2),
        ]),
        DeviceDescriptor::new(
            2,
            "Inverter",
            ChannelDescriptor::Network {
                host: "10.0.0.2".into(),
                port: 502,
            },
        )
        .with_interval_ms(2000)
        .with_registers(vec![RegisterRequest::new(4, 0, 8)]),
        DeviceDescriptor::new(
            3,
            "FlakySensor",
            ChannelDescriptor::Network {
                host: "10.0.0.3".into(),
                port: 502,
            },
        )
        .with_interval_ms(500)
        .with_registers(vec![RegisterRequest::new(3, 0, 2)]),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,pollcore=debug".into()),
        )
        .init();

    let (sink, mut rx) = QueueSink::new(1024);
    let provider = Arc::new(StaticProvider::new(devices()));

    let engine = PollEngine::new(
        EngineConfig::network("sim-lan")
            // Short periods so the demo shows backoff and recovery quickly.
            .with_failure_policy(FailurePolicy::new(BackoffConfig::new(500, 5_000)))
            .with_recovery_sweep_period(Duration::from_secs(15)),
        Arc::new(SimTransport {
            reads: AtomicU64::new(0),
        }),
        Arc::new(sink),
        provider,
        Arc::new(NoPressure),
        Some(Arc::new(SimConnector)),
    )
    .await?;

    // Downstream consumer: gate on batch markers, not timing.
    let consumer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                SinkItem::Reading(r) => {
                    println!(
                        "[READ ] device {} fc{} @{}+{}: {:?}",
                        r.device_id, r.request.function, r.request.start, r.request.count, r.values
                    );
                }
                SinkItem::BatchEnd(m) => {
                    println!(
                        "[CYCLE] device {} complete: ok={} fail={}",
                        m.device_id, m.success_count, m.fail_count
                    );
                }
            }
        }
    });

    engine.spawn();
    println!("Engine running for 30s; watch device 3 drop, back off, disable, and recover.");

    tokio::time::sleep(Duration::from_secs(30)).await;

    let status = engine.status();
    println!();
    println!(
        "Engine status: {} devices, {} scan passes, {} attempts ({} ok / {} failed)",
        status.device_count,
        status.cycles.scan_passes,
        status.cycles.attempts,
        status.cycles.successful_cycles,
        status.cycles.failed_cycles
    );
    for d in &status.devices {
        println!(
            "  device {} ({}): enabled={} reads={} ok={} rate={:.0}% avg_rt={:.1}ms reason={:?}",
            d.id,
            d.name,
            d.enabled,
            d.metrics.total_reads,
            d.metrics.successful_reads,
            d.metrics.success_rate * 100.0,
            d.metrics.avg_response_time_ms,
            d.disable_reason
        );
    }

    engine.shutdown().await;
    consumer.abort();
    let _ = consumer.await;
    println!("Engine stopped.");
    Ok(())
}
