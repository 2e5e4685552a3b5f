//! # Poll Core (pollcore)
//!
//! Device poll-scheduling engine for industrial gateways, bridging
//! periodically-polled field devices to a downstream telemetry pipeline.
//!
//! ## Features
//!
//! - **Per-device intervals**: O(1) non-blocking readiness checks; fast
//!   devices are never starved by slow or backing-off ones
//! - **Failure & recovery**: independent failure/timeout tracks with
//!   exponential backoff, auto-disable, and periodic auto-recovery
//! - **Connection pooling**: endpoint-keyed reuse with LRU eviction,
//!   age/idle sweeps, and emergency flush under memory pressure
//! - **Cycle completeness**: downstream consumers gate on a batch-end
//!   marker, never on elapsed time
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pollcore::prelude::*;
//!
//! // One engine per channel class, each with its own parameters.
//! let engine = PollEngine::new(
//!     EngineConfig::network("plant-lan"),
//!     transport,        // Arc<dyn Transport> — wire protocol lives here
//!     sink,             // Arc<dyn TelemetrySink> — downstream queue
//!     provider,         // Arc<dyn ConfigProvider> — device list
//!     Arc::new(NoPressure),
//!     Some(connector),  // Arc<dyn Connector> — opens pooled connections
//! )
//! .await?;
//!
//! engine.spawn();
//! // ...
//! engine.shutdown().await;
//! ```
//!
//! ## Scope
//!
//! Wire encoding, telemetry publishing, configuration storage, and the
//! administrative command surface are collaborators behind the traits in
//! [`core`]; this crate only schedules, tracks, and accounts.

pub mod core;
pub mod engine;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::{ConfigProvider, MemoryPressure, NoPressure, StaticProvider},
        device::{ChannelClass, ChannelDescriptor, DeviceDescriptor, DeviceId, RegisterRequest},
        error::{EngineError, Result},
        sink::{BatchMarker, QueueSink, ReadingRecord, SinkItem, TelemetrySink},
        transport::{Connection, ConnectionHandle, Connector, ReadOutcome, Transport},
    };
    pub use crate::engine::{
        BackoffConfig, DisableReason, EngineConfig, FailurePolicy, PollEngine, PoolConfig,
    };
}

// Re-export core types at crate root for convenience
pub use crate::core::device::{
    ChannelClass, ChannelDescriptor, DeviceDescriptor, DeviceId, RegisterRequest,
};
pub use crate::core::error::{EngineError, Result};
pub use crate::core::sink::{BatchMarker, SinkItem, TelemetrySink};
pub use crate::core::transport::{ReadOutcome, Transport};
pub use crate::engine::{DeviceStatus, EngineConfig, EngineStatus, PollEngine};
