// SPDX-License-Identifier: GPL-3.0-only

//! The seam between the registry and the device-management service.

use futures::future::BoxFuture;
use futures::stream::Stream;
use futures::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::DeviceError;
use crate::object::{Interface, ObjectKey, Properties, ServiceObject};

/// A lifecycle or property notification, in service delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    ObjectAdded(ServiceObject),
    ObjectRemoved(ServiceObject),
    PropertiesChanged {
        key: ObjectKey,
        interface: Interface,
        changed: Properties,
    },
}

/// Notifications delivered by a [`DeviceService`] subscription.
pub struct ServiceEventStream {
    receiver: mpsc::Receiver<ServiceEvent>,
}

impl ServiceEventStream {
    pub fn new(receiver: mpsc::Receiver<ServiceEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<ServiceEvent> {
        self.receiver.recv().await
    }
}

impl Stream for ServiceEventStream {
    type Item = ServiceEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Everything the registry and its records need from the service.
///
/// Request/response calls resolve when the service replies. `encrypted_unlock`
/// returns a detached future so the caller can keep processing notifications
/// while the unlock is in flight.
pub trait DeviceService: Send + Sync {
    fn managed_objects(&self) -> BoxFuture<'_, Result<Vec<ServiceObject>, DeviceError>>;

    fn subscribe(&self) -> BoxFuture<'_, Result<ServiceEventStream, DeviceError>>;

    fn drive_eject(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>>;

    fn drive_power_off(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>>;

    /// Returns the mount point reported by the service.
    fn filesystem_mount(&self, key: ObjectKey) -> BoxFuture<'_, Result<String, DeviceError>>;

    fn filesystem_unmount(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>>;

    /// Resolves to the key of the cleartext device.
    fn encrypted_unlock(
        &self,
        key: ObjectKey,
        passphrase: String,
    ) -> BoxFuture<'static, Result<ObjectKey, DeviceError>>;
}

/// Shared handle records use to reach the service.
pub type ServiceHandle = std::sync::Arc<dyn DeviceService>;
