//! Serializable status snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::failure::DisableReason;
use super::metrics::MetricsSnapshot;
use super::pool::PoolStats;
use crate::core::device::{ChannelClass, DeviceId};

/// Point-in-time status of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    /// Device id.
    pub id: DeviceId,
    /// Configured name.
    pub name: String,
    /// Whether the device may be scheduled.
    pub enabled: bool,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Retries consumed from the budget.
    pub retry_count: u32,
    /// Timeouts since the last success.
    pub consecutive_timeouts: u32,
    /// Why the device is disabled.
    pub disable_reason: DisableReason,
    /// Operator-facing detail accompanying the reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_reason_detail: Option<String>,
    /// Seconds since the device was disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_for_secs: Option<i64>,
    /// When the device last produced a full successful cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    /// Rolling health metrics.
    pub metrics: MetricsSnapshot,
}

/// Rolling per-engine cycle counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CycleStats {
    /// Scan passes completed.
    pub scan_passes: u64,
    /// Poll attempts started.
    pub attempts: u64,
    /// Attempts where every register read succeeded.
    pub successful_cycles: u64,
    /// Attempts with at least one timeout or failure.
    pub failed_cycles: u64,
    /// Register reads that produced values.
    pub registers_read: u64,
    /// Duration of the last scan pass in milliseconds.
    pub last_pass_ms: u64,
}

/// Aggregate status of one engine instance.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Channel class this engine serves.
    pub channel_class: ChannelClass,
    /// Total configured devices.
    pub device_count: usize,
    /// Per-device status array.
    pub devices: Vec<DeviceStatus>,
    /// Rolling cycle counters.
    pub cycles: CycleStats,
    /// Pool counters; absent for serial engines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
    /// Live pool entries; absent for serial engines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_entries: Option<usize>,
    /// Free-form engine-specific extras.
    pub extra: serde_json::Value,
}
