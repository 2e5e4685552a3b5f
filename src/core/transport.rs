//! Transport seam.
//!
//! Wire encoding lives entirely on the other side of these traits: the
//! engine hands a [`RegisterRequest`] to the [`Transport`] and gets back raw
//! register words or a failure. Timeouts are distinguished from protocol
//! errors because the two feed independent recovery tracks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::device::{ChannelDescriptor, RegisterRequest};
use crate::core::error::Result;

/// Outcome of a single register-request read.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// Raw register words, in request order.
    Values(Vec<u16>),

    /// No response within the transport bound.
    Timeout,

    /// Malformed/out-of-range response, or a device-signaled error.
    ProtocolError(String),
}

impl ReadOutcome {
    /// True if the read produced values.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Values(_))
    }

    /// True if the read timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// A reusable connection owned by the pool.
///
/// The engine never reads or writes through the handle itself; it only
/// threads the handle back into [`Transport::read_once`] so the transport
/// can reuse the established stream.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Close the underlying stream. Close failures are logged by the
    /// implementation, not propagated — a handle being dropped from the
    /// pool is already on its way out.
    async fn close(&self);
}

/// Shared connection handle.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Opens connections for the pool.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to `endpoint` (`host:port`).
    async fn open(&self, endpoint: &str) -> Result<ConnectionHandle>;
}

/// Synchronous-per-call transport: one register request in, one outcome out.
///
/// For networked channels the pool's handle is passed through so the
/// transport can reuse the established connection; serial channels receive
/// `None` and the transport arbitrates bus access internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one register read and wait for its outcome.
    ///
    /// Implementations should bound their own I/O; the engine additionally
    /// guards each call with its configured transport timeout and maps an
    /// elapsed guard to [`ReadOutcome::Timeout`].
    async fn read_once(
        &self,
        channel: &ChannelDescriptor,
        request: &RegisterRequest,
        conn: Option<&ConnectionHandle>,
    ) -> ReadOutcome;
}
