//! Rolling per-device health metrics.
//!
//! Counters accumulate per register read; derived figures (success rate,
//! average response time) are computed on demand and never cached.
//! Metrics reset only on explicit administrative clear or a device-list
//! rebuild.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::device::DeviceId;

/// Rolling counters for one device.
#[derive(Debug, Clone, Default)]
pub struct HealthMetrics {
    /// All register reads attempted.
    pub total_reads: u64,
    /// Reads that produced values.
    pub successful_reads: u64,
    /// Reads that timed out or errored.
    pub failed_reads: u64,
    /// Sum of response times over successful reads, in milliseconds.
    pub total_response_time_ms: u64,
    /// Fastest successful read; `None` until the first success.
    pub min_response_time_ms: Option<u64>,
    /// Slowest successful read.
    pub max_response_time_ms: u64,
    /// Most recent successful read.
    pub last_response_time_ms: u64,
}

impl HealthMetrics {
    /// Record one register read. Response time is only counted on
    /// success — a timeout's elapsed bound says nothing about the device.
    pub fn record_read(&mut self, success: bool, response_time_ms: u64) {
        self.total_reads += 1;
        if success {
            self.successful_reads += 1;
            self.total_response_time_ms += response_time_ms;
            self.last_response_time_ms = response_time_ms;
            self.max_response_time_ms = self.max_response_time_ms.max(response_time_ms);
            self.min_response_time_ms = Some(
                self.min_response_time_ms
                    .map_or(response_time_ms, |m| m.min(response_time_ms)),
            );
        } else {
            self.failed_reads += 1;
        }
    }

    /// Fraction of reads that succeeded; 0.0 before any read.
    pub fn success_rate(&self) -> f64 {
        if self.total_reads == 0 {
            0.0
        } else {
            self.successful_reads as f64 / self.total_reads as f64
        }
    }

    /// Mean response time over successful reads; 0.0 before any success.
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.successful_reads == 0 {
            0.0
        } else {
            self.total_response_time_ms as f64 / self.successful_reads as f64
        }
    }

    /// Point-in-time serializable copy with the derived figures filled in.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_reads: self.total_reads,
            successful_reads: self.successful_reads,
            failed_reads: self.failed_reads,
            success_rate: self.success_rate(),
            avg_response_time_ms: self.avg_response_time_ms(),
            min_response_time_ms: self.min_response_time_ms,
            max_response_time_ms: self.max_response_time_ms,
            last_response_time_ms: self.last_response_time_ms,
        }
    }
}

/// Serializable metrics snapshot for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_reads: u64,
    pub successful_reads: u64,
    pub failed_reads: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: u64,
    pub last_response_time_ms: u64,
}

/// Metrics keyed by device.
///
/// Not internally synchronized — the owner guards it with the engine
/// state lock, and the registry is rebuilt together with the device set.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    map: HashMap<DeviceId, HealthMetrics>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked device set with zeroed metrics.
    pub fn rebuild(&mut self, ids: impl IntoIterator<Item = DeviceId>) {
        self.map.clear();
        for id in ids {
            self.map.insert(id, HealthMetrics::default());
        }
    }

    /// Record one register read for a device.
    pub fn record_read(&mut self, id: DeviceId, success: bool, response_time_ms: u64) {
        if let Some(m) = self.map.get_mut(&id) {
            m.record_read(success, response_time_ms);
        }
    }

    /// Administrative clear for one device. Returns false when unknown.
    pub fn clear(&mut self, id: DeviceId) -> bool {
        match self.map.get_mut(&id) {
            Some(m) => {
                *m = HealthMetrics::default();
                true
            }
            None => false,
        }
    }

    /// Current metrics for one device.
    pub fn get(&self, id: DeviceId) -> Option<&HealthMetrics> {
        self.map.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_read_aggregates() {
        let mut m = HealthMetrics::default();
        m.record_read(true, 20);
        m.record_read(true, 10);
        m.record_read(false, 9999);
        m.record_read(true, 30);

        assert_eq!(m.total_reads, 4);
        assert_eq!(m.successful_reads, 3);
        assert_eq!(m.failed_reads, 1);
        assert_eq!(m.total_response_time_ms, 60);
        assert_eq!(m.min_response_time_ms, Some(10));
        assert_eq!(m.max_response_time_ms, 30);
        assert_eq!(m.last_response_time_ms, 30);
        assert!((m.success_rate() - 0.75).abs() < f64::EPSILON);
        assert!((m.avg_response_time_ms() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_derived_figures_before_any_read() {
        let m = HealthMetrics::default();
        assert_eq!(m.success_rate(), 0.0);
        assert_eq!(m.avg_response_time_ms(), 0.0);
    }

    #[test]
    fn test_clear_resets_without_division_by_zero() {
        let mut reg = MetricsRegistry::new();
        reg.rebuild([DeviceId(1)]);
        reg.record_read(DeviceId(1), true, 15);
        reg.record_read(DeviceId(1), false, 0);

        assert!(reg.clear(DeviceId(1)));
        let m = reg.get(DeviceId(1)).unwrap();
        assert_eq!(m.total_reads, 0);
        assert_eq!(m.successful_reads, 0);
        assert_eq!(m.failed_reads, 0);
        assert_eq!(m.success_rate(), 0.0);
        assert_eq!(m.avg_response_time_ms(), 0.0);

        assert!(!reg.clear(DeviceId(42)));
    }

    #[test]
    fn test_failed_reads_do_not_touch_response_times() {
        let mut m = HealthMetrics::default();
        m.record_read(false, 5000);
        assert_eq!(m.total_response_time_ms, 0);
        assert!(m.min_response_time_ms.is_none());
        assert_eq!(m.max_response_time_ms, 0);
    }
}
