//! Core abstractions for the poll engine.
//!
//! This module provides the device model, the collaborator seams
//! (transport, downstream sink, configuration, memory pressure), and the
//! error types everything else builds on.

pub mod config;
pub mod device;
pub mod error;
pub mod metadata;
pub mod sink;
pub mod transport;

pub use config::{ConfigProvider, MemoryPressure, NoPressure, StaticProvider};
pub use device::{ChannelClass, ChannelDescriptor, DeviceDescriptor, DeviceId, RegisterRequest};
pub use error::{EngineError, Result};
pub use metadata::{preset, EnginePreset, ENGINE_PRESETS};
pub use sink::{BatchMarker, QueueSink, ReadingRecord, SinkItem, TelemetrySink};
pub use transport::{Connection, ConnectionHandle, Connector, ReadOutcome, Transport};
