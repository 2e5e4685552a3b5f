//! The poll engine and its per-device state machinery.

pub mod backoff;
pub mod batch;
pub mod failure;
pub mod metrics;
pub mod pool;
pub mod poller;
pub mod scheduler;
pub mod status;

pub use backoff::BackoffConfig;
pub use batch::BatchCoordinator;
pub use failure::{DisableReason, FailurePolicy, FailureState, FailureTracker, TimeoutState};
pub use metrics::{HealthMetrics, MetricsRegistry, MetricsSnapshot};
pub use pool::{ConnectionPool, PoolConfig, PoolStats};
pub use poller::{EngineConfig, PollEngine};
pub use scheduler::DeviceScheduler;
pub use status::{CycleStats, DeviceStatus, EngineStatus};
