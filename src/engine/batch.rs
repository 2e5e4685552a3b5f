//! Per-cycle batch completion tracking.
//!
//! Downstream consumers gate on the batch-end marker, not on elapsed
//! time: once a device's expected register count has been accounted for
//! (or the cycle is abandoned), exactly one marker is emitted and the
//! tracker is cleared.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::device::DeviceId;
use crate::core::sink::BatchMarker;

/// Expected-versus-produced accounting for one device's cycle.
#[derive(Debug, Clone)]
struct BatchTracker {
    expected: u32,
    success: u32,
    fail: u32,
    started_at: DateTime<Utc>,
}

/// Tracks cycle completeness per device.
///
/// Not internally synchronized — the owner guards it with the engine
/// state lock.
#[derive(Debug, Default)]
pub struct BatchCoordinator {
    trackers: HashMap<DeviceId, BatchTracker>,
}

impl BatchCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a cycle expecting `expected` register results. A tracker
    /// left over from an earlier cycle is replaced.
    pub fn start_batch(&mut self, id: DeviceId, expected: u32) {
        self.trackers.insert(
            id,
            BatchTracker {
                expected,
                success: 0,
                fail: 0,
                started_at: Utc::now(),
            },
        );
    }

    /// Record one register result. Results beyond the expected count are
    /// ignored so `success + fail` never exceeds `expected`.
    pub fn record_register_result(&mut self, id: DeviceId, success: bool) {
        if let Some(t) = self.trackers.get_mut(&id) {
            if t.success + t.fail >= t.expected {
                return;
            }
            if success {
                t.success += 1;
            } else {
                t.fail += 1;
            }
        }
    }

    /// True once every expected result has been recorded.
    pub fn is_batch_complete(&self, id: DeviceId) -> bool {
        self.trackers
            .get(&id)
            .map_or(false, |t| t.success + t.fail >= t.expected)
    }

    /// End the cycle: clear the tracker and return its terminating
    /// marker, regardless of how many results were recorded. Returns
    /// `None` when no cycle was started.
    pub fn end_batch(&mut self, id: DeviceId) -> Option<BatchMarker> {
        self.trackers.remove(&id).map(|t| BatchMarker {
            device_id: id,
            success_count: t.success,
            fail_count: t.fail,
            timestamp: Utc::now(),
        })
    }

    /// When the open cycle for `id` started, if any.
    pub fn started_at(&self, id: DeviceId) -> Option<DateTime<Utc>> {
        self.trackers.get(&id).map(|t| t.started_at)
    }

    /// Number of cycles currently open.
    pub fn open_batches(&self) -> usize {
        self.trackers.len()
    }

    /// Drop every tracker (device-list rebuild).
    pub fn clear(&mut self) {
        self.trackers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_cycle_emits_one_marker() {
        let mut c = BatchCoordinator::new();
        c.start_batch(DeviceId(1), 3);

        c.record_register_result(DeviceId(1), true);
        c.record_register_result(DeviceId(1), true);
        assert!(!c.is_batch_complete(DeviceId(1)));

        c.record_register_result(DeviceId(1), false);
        assert!(c.is_batch_complete(DeviceId(1)));

        let marker = c.end_batch(DeviceId(1)).unwrap();
        assert_eq!(marker.success_count, 2);
        assert_eq!(marker.fail_count, 1);

        // The tracker is cleared exactly once.
        assert!(c.end_batch(DeviceId(1)).is_none());
        assert_eq!(c.open_batches(), 0);
    }

    #[test]
    fn test_abandoned_cycle_still_emits_one_marker() {
        let mut c = BatchCoordinator::new();
        c.start_batch(DeviceId(1), 5);

        c.record_register_result(DeviceId(1), true);
        c.record_register_result(DeviceId(1), false);
        assert!(!c.is_batch_complete(DeviceId(1)));

        let marker = c.end_batch(DeviceId(1)).unwrap();
        assert_eq!(marker.success_count, 1);
        assert_eq!(marker.fail_count, 1);
        assert!(c.end_batch(DeviceId(1)).is_none());
    }

    #[test]
    fn test_results_never_exceed_expected() {
        let mut c = BatchCoordinator::new();
        c.start_batch(DeviceId(1), 2);

        c.record_register_result(DeviceId(1), true);
        c.record_register_result(DeviceId(1), true);
        c.record_register_result(DeviceId(1), true);
        c.record_register_result(DeviceId(1), false);

        let marker = c.end_batch(DeviceId(1)).unwrap();
        assert_eq!(marker.success_count + marker.fail_count, 2);
    }

    #[test]
    fn test_no_batch_no_marker() {
        let mut c = BatchCoordinator::new();
        c.record_register_result(DeviceId(1), true);
        assert!(!c.is_batch_complete(DeviceId(1)));
        assert!(c.end_batch(DeviceId(1)).is_none());
    }

    #[test]
    fn test_empty_expected_count_completes_immediately() {
        let mut c = BatchCoordinator::new();
        c.start_batch(DeviceId(1), 0);
        assert!(c.is_batch_complete(DeviceId(1)));
        let marker = c.end_batch(DeviceId(1)).unwrap();
        assert_eq!(marker.success_count, 0);
        assert_eq!(marker.fail_count, 0);
    }
}
