//! Per-device failure, timeout, and recovery state.
//!
//! Two independent tracks decide when a device is taken out of rotation:
//! the failure-retry budget (exponential backoff, then auto-disable) and
//! the consecutive-timeout ceiling. A timeout never counts toward the
//! retry budget; the two have distinct recovery semantics and are only
//! reunited by a read success, which resets both.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::backoff::BackoffConfig;
use crate::core::device::DeviceId;

/// Why a device is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    /// Not disabled.
    None,
    /// Disabled by an administrative call.
    Manual,
    /// Retry budget exhausted.
    AutoRetryExhausted,
    /// Consecutive-timeout ceiling reached.
    AutoTimeoutExhausted,
}

impl DisableReason {
    /// True for the automatic reasons the recovery sweep may undo.
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::AutoRetryExhausted | Self::AutoTimeoutExhausted)
    }
}

/// Failure/retry ledger for one device.
#[derive(Debug, Clone)]
pub struct FailureState {
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Retries consumed from the budget; 0 means healthy.
    pub retry_count: u32,
    /// Earliest next attempt; meaningful only while `retry_count > 0`.
    pub next_retry_at: Option<Instant>,
    /// When the device was last attempted.
    pub last_attempt_at: Option<Instant>,
    /// When the device last produced a full successful cycle.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Whether the device may be scheduled at all.
    pub is_enabled: bool,
    /// Why the device is disabled.
    pub disable_reason: DisableReason,
    /// Operator-facing detail accompanying the reason.
    pub disable_reason_detail: Option<String>,
    /// When the device was disabled.
    pub disabled_at: Option<DateTime<Utc>>,
}

impl FailureState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            retry_count: 0,
            next_retry_at: None,
            last_attempt_at: None,
            last_success_at: None,
            is_enabled: true,
            disable_reason: DisableReason::None,
            disable_reason_detail: None,
            disabled_at: None,
        }
    }
}

/// Timeout ledger, tracked apart from generic failures.
#[derive(Debug, Clone, Default)]
pub struct TimeoutState {
    /// Timeouts since the last success.
    pub consecutive_timeouts: u32,
    /// When the device last succeeded.
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Limits shared by every device of one engine instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Retry budget before auto-disable (default 5).
    pub max_retries: u32,
    /// Consecutive-timeout ceiling before auto-disable (default 3).
    pub max_consecutive_timeouts: u32,
    /// Backoff parameters for this instance.
    pub backoff: BackoffConfig,
}

impl FailurePolicy {
    /// Policy with the given backoff and default ceilings.
    pub const fn new(backoff: BackoffConfig) -> Self {
        Self {
            max_retries: 5,
            max_consecutive_timeouts: 3,
            backoff,
        }
    }

    /// Override the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the consecutive-timeout ceiling.
    #[must_use]
    pub const fn with_max_consecutive_timeouts(mut self, max: u32) -> Self {
        self.max_consecutive_timeouts = max;
        self
    }
}

/// Failure/timeout/enablement tracking for the whole device set.
///
/// Not internally synchronized — the owner guards it with the engine
/// state lock, and the collections are rebuilt together with the device
/// set.
#[derive(Debug)]
pub struct FailureTracker {
    policy: FailurePolicy,
    failures: HashMap<DeviceId, FailureState>,
    timeouts: HashMap<DeviceId, TimeoutState>,
}

impl FailureTracker {
    /// Create a tracker with the given policy.
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
            timeouts: HashMap::new(),
        }
    }

    /// The policy this tracker enforces.
    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Replace the tracked device set with fresh state (device-list
    /// rebuild). Existing counters are discarded.
    pub fn rebuild(&mut self, ids: impl IntoIterator<Item = DeviceId>) {
        self.failures.clear();
        self.timeouts.clear();
        for id in ids {
            self.failures.insert(id, FailureState::new());
            self.timeouts.insert(id, TimeoutState::default());
        }
    }

    /// Whether the device is known to this tracker.
    pub fn contains(&self, id: DeviceId) -> bool {
        self.failures.contains_key(&id)
    }

    /// Number of tracked devices.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True when no device is tracked.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether the device may be scheduled.
    pub fn is_enabled(&self, id: DeviceId) -> bool {
        self.failures.get(&id).map_or(false, |f| f.is_enabled)
    }

    /// Whether the device is waiting out a backoff delay.
    pub fn in_backoff(&self, id: DeviceId) -> bool {
        self.failures
            .get(&id)
            .map_or(false, |f| f.is_enabled && f.retry_count > 0)
    }

    /// True only while Enabled-Backoff and the retry deadline has passed.
    /// The scheduler consults this in addition to its interval check.
    pub fn should_retry(&self, id: DeviceId) -> bool {
        self.failures.get(&id).map_or(false, |f| {
            f.is_enabled
                && f.retry_count > 0
                && f.next_retry_at.map_or(false, |at| Instant::now() >= at)
        })
    }

    /// Record a fully successful poll attempt: zero both tracks and stamp
    /// the success time.
    pub fn on_read_success(&mut self, id: DeviceId) {
        let now = Utc::now();
        if let Some(f) = self.failures.get_mut(&id) {
            f.consecutive_failures = 0;
            f.retry_count = 0;
            f.next_retry_at = None;
            f.last_attempt_at = Some(Instant::now());
            f.last_success_at = Some(now);
        }
        if let Some(t) = self.timeouts.get_mut(&id) {
            t.consecutive_timeouts = 0;
            t.last_success_at = Some(now);
        }
    }

    /// Record a failed poll attempt. Consumes one retry from the budget
    /// and schedules the backoff deadline; once the budget is exhausted
    /// the device transitions to Disabled-AutoRetry.
    ///
    /// Returns true when this call disabled the device.
    pub fn on_read_failure(&mut self, id: DeviceId) -> bool {
        let policy = self.policy;
        let Some(f) = self.failures.get_mut(&id) else {
            return false;
        };
        if !f.is_enabled {
            return false;
        }

        f.consecutive_failures += 1;
        f.last_attempt_at = Some(Instant::now());
        f.retry_count += 1;

        if f.retry_count >= policy.max_retries {
            f.is_enabled = false;
            f.disable_reason = DisableReason::AutoRetryExhausted;
            f.disable_reason_detail = Some(format!(
                "{} consecutive failures exhausted the retry budget of {}",
                f.consecutive_failures, policy.max_retries
            ));
            f.disabled_at = Some(Utc::now());
            f.next_retry_at = None;
            true
        } else {
            f.next_retry_at = Some(Instant::now() + policy.backoff.delay_for(f.retry_count));
            false
        }
    }

    /// Record a timed-out poll attempt. Independent of the retry budget;
    /// at the ceiling the device transitions to Disabled-AutoTimeout.
    ///
    /// Returns true when this call disabled the device.
    pub fn on_read_timeout(&mut self, id: DeviceId) -> bool {
        let policy = self.policy;
        if !self.is_enabled(id) {
            return false;
        }
        let Some(t) = self.timeouts.get_mut(&id) else {
            return false;
        };

        t.consecutive_timeouts += 1;
        let exhausted = t.consecutive_timeouts >= policy.max_consecutive_timeouts;
        let timeouts_seen = t.consecutive_timeouts;

        if let Some(f) = self.failures.get_mut(&id) {
            f.last_attempt_at = Some(Instant::now());
            if exhausted {
                f.is_enabled = false;
                f.disable_reason = DisableReason::AutoTimeoutExhausted;
                f.disable_reason_detail = Some(format!(
                    "{} consecutive timeouts reached the ceiling of {}",
                    timeouts_seen, policy.max_consecutive_timeouts
                ));
                f.disabled_at = Some(Utc::now());
                f.next_retry_at = None;
            }
        }
        exhausted
    }

    /// Administrative disable. Returns false for an unknown device.
    pub fn disable(&mut self, id: DeviceId, reason: DisableReason, detail: Option<String>) -> bool {
        let Some(f) = self.failures.get_mut(&id) else {
            return false;
        };
        f.is_enabled = false;
        f.disable_reason = reason;
        f.disable_reason_detail = detail;
        f.disabled_at = Some(Utc::now());
        f.next_retry_at = None;
        true
    }

    /// Re-enable a device, clearing retry and timeout counters. The
    /// scheduler's interval check still applies afterwards. Returns false
    /// for an unknown device.
    pub fn enable(&mut self, id: DeviceId) -> bool {
        let Some(f) = self.failures.get_mut(&id) else {
            return false;
        };
        f.is_enabled = true;
        f.disable_reason = DisableReason::None;
        f.disable_reason_detail = None;
        f.disabled_at = None;
        f.consecutive_failures = 0;
        f.retry_count = 0;
        f.next_retry_at = None;
        if let Some(t) = self.timeouts.get_mut(&id) {
            t.consecutive_timeouts = 0;
        }
        true
    }

    /// Re-enable every auto-disabled device (never Disabled-Manual).
    /// This is the only automatic path back from an auto-disable.
    ///
    /// Returns the ids that were re-enabled.
    pub fn recovery_sweep(&mut self) -> Vec<DeviceId> {
        let ids: Vec<DeviceId> = self
            .failures
            .iter()
            .filter(|(_, f)| !f.is_enabled && f.disable_reason.is_auto())
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.enable(*id);
        }
        ids
    }

    /// Current state pair for one device.
    pub fn get(&self, id: DeviceId) -> Option<(&FailureState, &TimeoutState)> {
        let f = self.failures.get(&id)?;
        let t = self.timeouts.get(&id)?;
        Some((f, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> FailureTracker {
        let mut t = FailureTracker::new(FailurePolicy::new(BackoffConfig::new(100, 10_000)));
        t.rebuild([DeviceId(1), DeviceId(2)]);
        t
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhaustion_disables() {
        let mut t = tracker();

        for i in 1..=4 {
            assert!(!t.on_read_failure(DeviceId(1)), "failure {} disabled early", i);
            assert!(t.is_enabled(DeviceId(1)));
            assert!(t.in_backoff(DeviceId(1)));
        }

        // Fifth failure exhausts the default budget of 5.
        assert!(t.on_read_failure(DeviceId(1)));
        let (f, _) = t.get(DeviceId(1)).unwrap();
        assert!(!f.is_enabled);
        assert_eq!(f.disable_reason, DisableReason::AutoRetryExhausted);
        assert_eq!(f.consecutive_failures, 5);
        assert!(f.disabled_at.is_some());

        // Permanently out of rotation until enable() is called.
        assert!(!t.should_retry(DeviceId(1)));
        tokio::time::advance(std::time::Duration::from_secs(3600)).await;
        assert!(!t.should_retry(DeviceId(1)));

        // Other devices are untouched.
        assert!(t.is_enabled(DeviceId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_waits_for_deadline() {
        let mut t = tracker();

        t.on_read_failure(DeviceId(1));
        // Deadline is 100ms..125ms out; not yet reached.
        assert!(!t.should_retry(DeviceId(1)));

        tokio::time::advance(std::time::Duration::from_millis(130)).await;
        assert!(t.should_retry(DeviceId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_both_tracks() {
        let mut t = tracker();

        t.on_read_failure(DeviceId(1));
        t.on_read_timeout(DeviceId(1));
        t.on_read_success(DeviceId(1));

        let (f, to) = t.get(DeviceId(1)).unwrap();
        assert_eq!(f.consecutive_failures, 0);
        assert_eq!(f.retry_count, 0);
        assert!(f.next_retry_at.is_none());
        assert!(f.last_success_at.is_some());
        assert_eq!(to.consecutive_timeouts, 0);
        assert!(!t.in_backoff(DeviceId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_track_is_independent() {
        let mut t = tracker();

        // Two timeouts do not consume the retry budget.
        t.on_read_timeout(DeviceId(1));
        t.on_read_timeout(DeviceId(1));
        let (f, to) = t.get(DeviceId(1)).unwrap();
        assert_eq!(f.retry_count, 0);
        assert_eq!(to.consecutive_timeouts, 2);

        // Third timeout hits the default ceiling of 3.
        assert!(t.on_read_timeout(DeviceId(1)));
        let (f, _) = t.get(DeviceId(1)).unwrap();
        assert!(!f.is_enabled);
        assert_eq!(f.disable_reason, DisableReason::AutoTimeoutExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_sweep_skips_manual() {
        let mut t = tracker();

        // Device 1 auto-disabled by timeouts; device 2 manually disabled.
        for _ in 0..3 {
            t.on_read_timeout(DeviceId(1));
        }
        t.disable(DeviceId(2), DisableReason::Manual, Some("maintenance".into()));

        let reenabled = t.recovery_sweep();
        assert_eq!(reenabled, vec![DeviceId(1)]);

        let (f1, to1) = t.get(DeviceId(1)).unwrap();
        assert!(f1.is_enabled);
        assert_eq!(f1.disable_reason, DisableReason::None);
        assert_eq!(to1.consecutive_timeouts, 0);

        let (f2, _) = t.get(DeviceId(2)).unwrap();
        assert!(!f2.is_enabled);
        assert_eq!(f2.disable_reason, DisableReason::Manual);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_device_ignores_outcomes() {
        let mut t = tracker();
        t.disable(DeviceId(1), DisableReason::Manual, None);

        assert!(!t.on_read_failure(DeviceId(1)));
        assert!(!t.on_read_timeout(DeviceId(1)));
        let (f, to) = t.get(DeviceId(1)).unwrap();
        assert_eq!(f.consecutive_failures, 0);
        assert_eq!(to.consecutive_timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_discards_counters() {
        let mut t = tracker();
        t.on_read_failure(DeviceId(1));

        t.rebuild([DeviceId(1), DeviceId(3)]);
        let (f, _) = t.get(DeviceId(1)).unwrap();
        assert_eq!(f.retry_count, 0);
        assert!(t.contains(DeviceId(3)));
        assert!(!t.contains(DeviceId(2)));
    }
}
