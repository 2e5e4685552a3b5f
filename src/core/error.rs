//! Error types for the poll engine.

use thiserror::Error;

use crate::core::device::DeviceId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the poll engine.
///
/// Read-level failures (timeouts, protocol errors) are *data* fed into the
/// failure state machine, not errors — they never surface through this type.
/// `EngineError` covers configuration problems, administrative calls on
/// unknown devices, and resource exhaustion.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration (bad descriptor, missing collaborator).
    #[error("configuration error: {0}")]
    Config(String),

    /// A connection could not be established or maintained.
    #[error("connection error: {0}")]
    Connection(String),

    /// Device responded with malformed or out-of-range data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Administrative call named a device the engine does not know.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// Downstream queue rejected an enqueue (full or consumer gone).
    #[error("downstream queue rejected item")]
    QueueRejected,

    /// Invariant violation or unexpected internal state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
