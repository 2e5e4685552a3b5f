//! Device and channel descriptors.
//!
//! A [`DeviceDescriptor`] is the engine's entire knowledge of one field
//! device: how to reach it, how often to poll it, and which registers to
//! read. Descriptors are supplied wholesale by the configuration provider
//! and validated once at rebuild — never re-validated per read.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, Result};

/// Unique device identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Channel class a device (and a [`crate::engine::PollEngine`] instance)
/// belongs to.
///
/// Serial-bus devices share one physical line and need no connection pool;
/// networked devices each get a pooled connection per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelClass {
    /// Multidrop serial bus (one line, many addresses).
    SerialBus,
    /// Packet-switched network (one pooled connection per endpoint).
    Network,
}

impl fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialBus => write!(f, "serial_bus"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// How to reach a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelDescriptor {
    /// Shared serial bus: port device, baud rate, slave address on the bus.
    Serial { port: String, baud: u32, address: u8 },

    /// Network endpoint.
    Network { host: String, port: u16 },
}

impl ChannelDescriptor {
    /// The channel class this descriptor belongs to.
    pub fn class(&self) -> ChannelClass {
        match self {
            Self::Serial { .. } => ChannelClass::SerialBus,
            Self::Network { .. } => ChannelClass::Network,
        }
    }

    /// Pool key for networked channels (`host:port`); `None` for serial.
    pub fn endpoint(&self) -> Option<String> {
        match self {
            Self::Serial { .. } => None,
            Self::Network { host, port } => Some(format!("{}:{}", host, port)),
        }
    }

    /// Validate the descriptor. Called once at device-list rebuild.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Serial { port, baud, .. } => {
                if port.is_empty() {
                    return Err(EngineError::config("serial port must not be empty"));
                }
                if *baud == 0 {
                    return Err(EngineError::config("serial baud rate must not be zero"));
                }
            }
            Self::Network { host, port } => {
                if host.is_empty() {
                    return Err(EngineError::config("network host must not be empty"));
                }
                if *port == 0 {
                    return Err(EngineError::config("network port must not be zero"));
                }
            }
        }
        Ok(())
    }
}

/// One register read request, opaque to the engine.
///
/// The engine carries requests through to the transport untouched; building
/// protocol frames and decoding raw words into typed values happens on the
/// other side of the [`crate::core::transport::Transport`] seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Protocol function code.
    pub function: u8,
    /// First register address.
    pub start: u16,
    /// Number of registers to read.
    pub count: u16,
}

impl RegisterRequest {
    /// Create a new register request.
    pub fn new(function: u8, start: u16, count: u16) -> Self {
        Self {
            function,
            start,
            count,
        }
    }
}

/// Full description of one field device.
///
/// Rebuilt wholesale on every configuration-change notification — never
/// diffed against the previous generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device id.
    pub id: DeviceId,

    /// Human-readable name for logs and status reports.
    pub name: String,

    /// How to reach the device.
    pub channel: ChannelDescriptor,

    /// Refresh interval in milliseconds.
    pub interval_ms: u64,

    /// Ordered register requests read each cycle.
    pub registers: Vec<RegisterRequest>,

    /// Configured-enabled flag; a disabled device is never scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DeviceDescriptor {
    /// Create a new descriptor with the given id, name, and channel.
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>, channel: ChannelDescriptor) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            channel,
            interval_ms: 1000,
            registers: Vec::new(),
            enabled: true,
        }
    }

    /// Set the refresh interval in milliseconds.
    #[must_use]
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set the register requests.
    #[must_use]
    pub fn with_registers(mut self, registers: Vec<RegisterRequest>) -> Self {
        self.registers = registers;
        self
    }

    /// Set the configured-enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Refresh interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate the descriptor. Called once at device-list rebuild.
    pub fn validate(&self) -> Result<()> {
        self.channel.validate()?;
        if self.interval_ms == 0 {
            return Err(EngineError::config(format!(
                "device {}: refresh interval must not be zero",
                self.id
            )));
        }
        if self.registers.is_empty() {
            return Err(EngineError::config(format!(
                "device {}: at least one register request is required",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_class() {
        let serial = ChannelDescriptor::Serial {
            port: "/dev/ttyS0".into(),
            baud: 9600,
            address: 3,
        };
        assert_eq!(serial.class(), ChannelClass::SerialBus);
        assert!(serial.endpoint().is_none());

        let net = ChannelDescriptor::Network {
            host: "10.0.0.5".into(),
            port: 502,
        };
        assert_eq!(net.class(), ChannelClass::Network);
        assert_eq!(net.endpoint().as_deref(), Some("10.0.0.5:502"));
    }

    #[test]
    fn test_descriptor_validation() {
        let channel = ChannelDescriptor::Network {
            host: "10.0.0.5".into(),
            port: 502,
        };

        let ok = DeviceDescriptor::new(1, "meter", channel.clone())
            .with_registers(vec![RegisterRequest::new(3, 0, 4)]);
        assert!(ok.validate().is_ok());

        let no_registers = DeviceDescriptor::new(2, "empty", channel.clone());
        assert!(no_registers.validate().is_err());

        let zero_interval = DeviceDescriptor::new(3, "fast", channel)
            .with_registers(vec![RegisterRequest::new(3, 0, 1)])
            .with_interval_ms(0);
        assert!(zero_interval.validate().is_err());

        let bad_channel = DeviceDescriptor::new(
            4,
            "hostless",
            ChannelDescriptor::Network {
                host: String::new(),
                port: 502,
            },
        )
        .with_registers(vec![RegisterRequest::new(3, 0, 1)]);
        assert!(bad_channel.validate().is_err());
    }
}
