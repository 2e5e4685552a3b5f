//! Downstream telemetry queue seam.
//!
//! The engine pushes two kinds of items downstream: raw register readings
//! as they are produced, and one [`BatchMarker`] per device per cycle.
//! Consumers gate publication on the marker, not on elapsed time, so a
//! published snapshot is never split across poll cycles.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::device::{DeviceId, RegisterRequest};
use crate::core::error::{EngineError, Result};

/// Raw values produced by one register request of one device.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingRecord {
    /// Device the values belong to.
    pub device_id: DeviceId,
    /// The request that produced them.
    pub request: RegisterRequest,
    /// Raw register words, in request order.
    pub values: Vec<u16>,
    /// When the read completed.
    pub timestamp: DateTime<Utc>,
}

/// Terminating marker for one device's poll cycle.
///
/// Emitted exactly once per started cycle, even when the cycle was
/// abandoned with fewer results than expected.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMarker {
    /// Device the cycle belongs to.
    pub device_id: DeviceId,
    /// Register requests that produced values this cycle.
    pub success_count: u32,
    /// Register requests that failed this cycle.
    pub fail_count: u32,
    /// When the cycle ended.
    pub timestamp: DateTime<Utc>,
}

/// Items flowing to the downstream consumer.
#[derive(Debug, Clone)]
pub enum SinkItem {
    /// One register request's values.
    Reading(ReadingRecord),
    /// Cycle-complete marker for a device.
    BatchEnd(BatchMarker),
}

/// Downstream consumer seam.
///
/// `enqueue` must never block the poll loop: a consumer that cannot keep
/// up rejects, and the engine records the rejection as a failed register
/// in the running batch rather than retrying inline.
pub trait TelemetrySink: Send + Sync {
    /// Hand one item downstream without blocking.
    ///
    /// Returns [`EngineError::QueueRejected`] when the queue is full or
    /// the consumer is gone.
    fn enqueue(&self, item: SinkItem) -> Result<()>;
}

/// Bounded in-process sink backed by a tokio mpsc channel.
pub struct QueueSink {
    tx: mpsc::Sender<SinkItem>,
}

impl QueueSink {
    /// Create a sink with the given queue capacity, returning the receiver
    /// half for the consumer.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl TelemetrySink for QueueSink {
    fn enqueue(&self, item: SinkItem) -> Result<()> {
        self.tx.try_send(item).map_err(|_| EngineError::QueueRejected)
    }
}
