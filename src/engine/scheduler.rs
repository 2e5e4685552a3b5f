//! Per-device poll scheduling.
//!
//! Each device carries its own refresh interval; the scheduler answers
//! "is this device due?" in O(1) without blocking, so short-interval
//! devices are never delayed by long-interval or backing-off ones.
//!
//! Timekeeping uses [`tokio::time::Instant`] so tests can pause and
//! advance the clock deterministically.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::device::DeviceId;

/// One device's scheduling ledger.
#[derive(Debug, Clone, Copy)]
struct ScheduleEntry {
    /// When the device was last attempted (success or failure).
    last_attempt: Instant,
    /// Refresh interval at last sight.
    interval: Duration,
}

/// Tracks when each device was last attempted against its interval.
///
/// Not internally synchronized — the owner guards it with the engine
/// state lock, alongside the other per-device collections.
#[derive(Debug, Default)]
pub struct DeviceScheduler {
    entries: HashMap<DeviceId, ScheduleEntry>,
}

impl DeviceScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device is due for a poll.
    ///
    /// The first call for an unseen id creates its entry and returns
    /// true; subsequent calls return `(now - last_attempt) >= interval`.
    /// A changed interval takes effect immediately.
    pub fn is_due(&mut self, id: DeviceId, interval: Duration) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(&id) {
            None => {
                self.entries.insert(
                    id,
                    ScheduleEntry {
                        last_attempt: now,
                        interval,
                    },
                );
                true
            }
            Some(entry) => {
                entry.interval = interval;
                now.duration_since(entry.last_attempt) >= interval
            }
        }
    }

    /// Record that an attempt was made. Must be called exactly once per
    /// attempt — success or failure — or devices starve or flood.
    pub fn mark_attempted(&mut self, id: DeviceId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.last_attempt = Instant::now();
        }
    }

    /// Forget every entry (device-list rebuild).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of tracked devices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no device is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
