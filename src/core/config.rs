//! Configuration provider seam.
//!
//! The configuration store itself is a collaborator; the engine only
//! consumes the full device list plus a change signal, and always rebuilds
//! wholesale on notification.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::device::DeviceDescriptor;
use crate::core::error::Result;

/// Supplies the device-descriptor list and a change-notification signal.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// The complete current device list. The engine never diffs; every
    /// call is treated as a fresh generation.
    async fn device_list(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Notification handle fired after the stored list changes.
    fn changed(&self) -> Arc<Notify>;
}

/// In-memory provider for demos and tests.
pub struct StaticProvider {
    devices: std::sync::RwLock<Vec<DeviceDescriptor>>,
    notify: Arc<Notify>,
}

impl StaticProvider {
    /// Create a provider with a fixed initial device list.
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices: std::sync::RwLock::new(devices),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Replace the device list and fire the change signal.
    pub fn replace(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.write().expect("device list lock poisoned") = devices;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl ConfigProvider for StaticProvider {
    async fn device_list(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .read()
            .expect("device list lock poisoned")
            .clone())
    }

    fn changed(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

/// Memory-pressure collaborator seam.
///
/// The pool sweep consults `is_low` each pass; sustained resource
/// exhaustion (downstream queue rejections, pool saturation) is reported
/// through `report_exhaustion`. What the collaborator does about either is
/// out of the engine's hands.
pub trait MemoryPressure: Send + Sync {
    /// True while the host considers memory scarce; the pool responds by
    /// closing every pooled connection.
    fn is_low(&self) -> bool;

    /// Report a resource-exhaustion event for external recovery.
    fn report_exhaustion(&self, detail: &str);
}

/// Collaborator stub that never reports pressure.
pub struct NoPressure;

impl MemoryPressure for NoPressure {
    fn is_low(&self) -> bool {
        false
    }

    fn report_exhaustion(&self, _detail: &str) {}
}
