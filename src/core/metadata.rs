//! Engine preset metadata.
//!
//! Self-describing parameter presets for the two channel classes, used by
//! the CLI for discovery and by demos as construction shortcuts. The
//! numbers here are recommendations, not hardcoded engine constants —
//! every engine instance is constructed with its own configuration.

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::core::device::ChannelClass;

/// One recommended engine configuration.
#[derive(Debug, Clone, Serialize)]
pub struct EnginePreset {
    /// Internal preset name (used on the CLI).
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// What the preset is tuned for.
    pub description: &'static str,
    /// Channel class the preset targets.
    pub class: ChannelClass,
    /// Backoff base delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff delay cap in milliseconds.
    pub backoff_max_ms: u64,
    /// Pause between scan passes in milliseconds.
    pub scan_pause_ms: u64,
    /// Per-read transport timeout in milliseconds.
    pub transport_timeout_ms: u64,
    /// Pool capacity; `None` for serial (no pool).
    pub pool_capacity: Option<usize>,
}

/// Registry of recommended presets, one per channel class.
pub static ENGINE_PRESETS: Lazy<Vec<EnginePreset>> = Lazy::new(|| {
    vec![
        EnginePreset {
            name: "serial",
            display_name: "Serial bus",
            description: "Multidrop serial bus; retries are cheap, so backoff starts small",
            class: ChannelClass::SerialBus,
            backoff_base_ms: 250,
            backoff_max_ms: 10_000,
            scan_pause_ms: 100,
            transport_timeout_ms: 3_000,
            pool_capacity: None,
        },
        EnginePreset {
            name: "network",
            display_name: "Network",
            description: "Packet-switched endpoints; a retry implies a fresh handshake, so backoff starts larger",
            class: ChannelClass::Network,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            scan_pause_ms: 100,
            transport_timeout_ms: 3_000,
            pool_capacity: Some(10),
        },
    ]
});

/// Look up a preset by name (case-insensitive).
pub fn preset(name: &str) -> Option<&'static EnginePreset> {
    ENGINE_PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_cover_both_classes() {
        assert!(ENGINE_PRESETS
            .iter()
            .any(|p| p.class == ChannelClass::SerialBus));
        assert!(ENGINE_PRESETS
            .iter()
            .any(|p| p.class == ChannelClass::Network));
    }

    #[test]
    fn test_preset_lookup() {
        assert!(preset("network").is_some());
        assert!(preset("NETWORK").is_some());
        assert!(preset("canbus").is_none());

        let serial = preset("serial").unwrap();
        assert!(serial.pool_capacity.is_none());
        assert!(serial.backoff_base_ms < preset("network").unwrap().backoff_base_ms);
    }
}
