//! Exponential backoff with jitter.
//!
//! Backoff parameters are per engine instance, not global constants:
//! serial-bus retries are cheap and start small, while a network retry
//! implies a fresh handshake and starts larger.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff parameters for one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Base delay in milliseconds for the first retry.
    pub base_ms: u64,
    /// Cap on the exponential delay in milliseconds (jitter may add up to
    /// a further quarter on top).
    pub max_delay_ms: u64,
}

impl BackoffConfig {
    /// Create a backoff configuration.
    pub const fn new(base_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_ms,
            max_delay_ms,
        }
    }

    /// Recommended parameters for serial-bus channels.
    pub const fn serial() -> Self {
        Self::new(250, 10_000)
    }

    /// Recommended parameters for networked channels.
    pub const fn network() -> Self {
        Self::new(1_000, 60_000)
    }

    /// Delay before the `retry_count`-th retry:
    /// `min(base * 2^(retry_count-1), max_delay)` plus uniform jitter in
    /// `[0, delay/4]`.
    ///
    /// `retry_count` is 1-based; 0 is treated as 1.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        // 2^63 already saturates any sane max_delay; clamp the shift so
        // large retry counts cannot overflow.
        let exp = retry_count.saturating_sub(1).min(62);
        let raw = self
            .base_ms
            .checked_mul(1u64 << exp)
            .unwrap_or(self.max_delay_ms);
        let delay = raw.min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=delay / 4);
        Duration::from_millis(delay + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_jitter_bounds() {
        let cfg = BackoffConfig::new(1_000, 60_000);

        for retry in 1..=5u32 {
            let lower = 1_000u64 * 2u64.pow(retry - 1);
            let upper = lower + lower / 4;
            for _ in 0..50 {
                let d = cfg.delay_for(retry).as_millis() as u64;
                assert!(
                    (lower..=upper).contains(&d),
                    "retry {}: delay {} outside [{}, {}]",
                    retry,
                    d,
                    lower,
                    upper
                );
            }
        }
    }

    #[test]
    fn test_delay_caps_at_max() {
        let cfg = BackoffConfig::new(1_000, 8_000);

        // 2^(10-1) * 1000 would be 512s; the cap plus max jitter bounds it.
        for _ in 0..50 {
            let d = cfg.delay_for(10).as_millis() as u64;
            assert!((8_000..=10_000).contains(&d));
        }
    }

    #[test]
    fn test_bands_are_non_overlapping_below_max() {
        // Jitter is at most a quarter of the delay, so the band for retry
        // n ends strictly below the band for retry n+1.
        let cfg = BackoffConfig::serial();
        for retry in 1..=4u32 {
            let upper_n = cfg.base_ms * 2u64.pow(retry - 1) * 5 / 4;
            let lower_next = cfg.base_ms * 2u64.pow(retry);
            assert!(upper_n < lower_next);
        }
    }

    #[test]
    fn test_zero_retry_count_treated_as_first() {
        let cfg = BackoffConfig::new(400, 60_000);
        for _ in 0..20 {
            let d = cfg.delay_for(0).as_millis() as u64;
            assert!((400..=500).contains(&d));
        }
    }

    #[test]
    fn test_huge_retry_count_does_not_overflow() {
        let cfg = BackoffConfig::new(1_000, 60_000);
        let d = cfg.delay_for(u32::MAX).as_millis() as u64;
        assert!(d <= 75_000);
    }
}
