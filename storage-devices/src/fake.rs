// SPDX-License-Identifier: GPL-3.0-only

//! In-memory [`DeviceService`] for unit tests.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::DeviceError;
use crate::object::{Interface, ObjectKey, Properties, ServiceObject};
use crate::service::{DeviceService, ServiceEvent, ServiceEventStream, ServiceHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Eject(ObjectKey),
    PowerOff(ObjectKey),
    Mount(ObjectKey),
    Unmount(ObjectKey),
    Unlock(ObjectKey, String),
}

#[derive(Clone)]
pub(crate) struct FakeService {
    calls: Arc<Mutex<Vec<Call>>>,
    objects: Arc<Mutex<Vec<ServiceObject>>>,
    events: Arc<Mutex<Option<mpsc::Sender<ServiceEvent>>>>,
    eject_result: Arc<Mutex<Result<(), String>>>,
    power_off_result: Arc<Mutex<Result<(), String>>>,
    mount_result: Arc<Mutex<Result<String, String>>>,
    unmount_result: Arc<Mutex<Result<(), String>>>,
    unlock_result: Arc<Mutex<Result<String, String>>>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            objects: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(Mutex::new(None)),
            eject_result: Arc::new(Mutex::new(Ok(()))),
            power_off_result: Arc::new(Mutex::new(Ok(()))),
            mount_result: Arc::new(Mutex::new(Ok("/run/media/user/disk".to_string()))),
            unmount_result: Arc::new(Mutex::new(Ok(()))),
            unlock_result: Arc::new(Mutex::new(Ok(
                "/org/freedesktop/UDisks2/block_devices/dm_2d0".to_string(),
            ))),
        }
    }
}

impl FakeService {
    pub(crate) fn handle(&self) -> ServiceHandle {
        Arc::new(self.clone())
    }

    pub(crate) fn set_objects(&self, objects: Vec<ServiceObject>) {
        *self.objects.lock().unwrap() = objects;
    }

    pub(crate) fn set_eject_result(&self, res: Result<(), String>) {
        *self.eject_result.lock().unwrap() = res;
    }

    pub(crate) fn set_power_off_result(&self, res: Result<(), String>) {
        *self.power_off_result.lock().unwrap() = res;
    }

    pub(crate) fn set_mount_result(&self, res: Result<String, String>) {
        *self.mount_result.lock().unwrap() = res;
    }

    pub(crate) fn set_unmount_result(&self, res: Result<(), String>) {
        *self.unmount_result.lock().unwrap() = res;
    }

    pub(crate) fn set_unlock_result(&self, res: Result<String, String>) {
        *self.unlock_result.lock().unwrap() = res;
    }

    /// Deliver a notification to the current subscriber.
    pub(crate) fn push(&self, event: ServiceEvent) {
        if let Some(sender) = self.events.lock().unwrap().as_ref() {
            sender.try_send(event).unwrap();
        }
    }

    /// End the notification stream.
    pub(crate) fn close(&self) {
        self.events.lock().unwrap().take();
    }

    pub(crate) fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn failed(action: &str, res: Result<(), String>) -> Result<(), DeviceError> {
    res.map_err(|e| DeviceError::operation(action, e))
}

impl DeviceService for FakeService {
    fn managed_objects(&self) -> BoxFuture<'_, Result<Vec<ServiceObject>, DeviceError>> {
        let objects = self.objects.lock().unwrap().clone();
        Box::pin(async move { Ok(objects) })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<ServiceEventStream, DeviceError>> {
        let (sender, receiver) = mpsc::channel(64);
        *self.events.lock().unwrap() = Some(sender);
        Box::pin(async move { Ok(ServiceEventStream::new(receiver)) })
    }

    fn drive_eject(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>> {
        self.record(Call::Eject(key));
        let res = self.eject_result.lock().unwrap().clone();
        Box::pin(async move { failed("Eject", res) })
    }

    fn drive_power_off(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>> {
        self.record(Call::PowerOff(key));
        let res = self.power_off_result.lock().unwrap().clone();
        Box::pin(async move { failed("Power off", res) })
    }

    fn filesystem_mount(&self, key: ObjectKey) -> BoxFuture<'_, Result<String, DeviceError>> {
        self.record(Call::Mount(key));
        let res = self.mount_result.lock().unwrap().clone();
        Box::pin(async move { res.map_err(|e| DeviceError::operation("Mount", e)) })
    }

    fn filesystem_unmount(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>> {
        self.record(Call::Unmount(key));
        let res = self.unmount_result.lock().unwrap().clone();
        Box::pin(async move { failed("Unmount", res) })
    }

    fn encrypted_unlock(
        &self,
        key: ObjectKey,
        passphrase: String,
    ) -> BoxFuture<'static, Result<ObjectKey, DeviceError>> {
        self.record(Call::Unlock(key, passphrase));
        let res = self.unlock_result.lock().unwrap().clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            res.map(ObjectKey::from)
                .map_err(|e| DeviceError::operation("Unlock", e))
        })
    }
}

fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

pub(crate) fn drive_object(key: &str, ejectable: bool, can_power_off: bool) -> ServiceObject {
    ServiceObject::new(key).with_interface(
        Interface::Drive,
        Properties::new()
            .with("Id", last_segment(key))
            .with("Ejectable", ejectable)
            .with("CanPowerOff", can_power_off),
    )
}

pub(crate) fn block_properties(label: Option<&str>, drive: Option<&str>) -> Properties {
    Properties::new()
        .with("IdLabel", label.unwrap_or(""))
        .with("IdUUID", "")
        .with("Drive", ObjectKey::from(drive.unwrap_or(ObjectKey::NONE)))
}

pub(crate) fn filesystem_object(
    key: &str,
    label: Option<&str>,
    drive: Option<&str>,
    mount_points: Vec<Vec<u8>>,
) -> ServiceObject {
    ServiceObject::new(key)
        .with_interface(Interface::Block, block_properties(label, drive))
        .with_interface(
            Interface::Filesystem,
            Properties::new().with("MountPoints", mount_points),
        )
}

pub(crate) fn encrypted_object(key: &str, cleartext: &str) -> ServiceObject {
    ServiceObject::new(key)
        .with_interface(Interface::Block, block_properties(None, None))
        .with_interface(
            Interface::Encrypted,
            Properties::new().with("CleartextDevice", ObjectKey::from(cleartext)),
        )
}
