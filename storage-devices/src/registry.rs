// SPDX-License-Identifier: GPL-3.0-only

//! Live registry of drives, filesystems and encrypted volumes
//!
//! The registry consumes service notifications one at a time, keeps one record
//! per object key in three maps and tells subscribers about:
//! - filesystems appearing, changing and disappearing
//! - locked encrypted volumes appearing, and disappearing once unlocked
//! - the outcome of unlock attempts

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{PowerOffGate, RegistryConfig};
use crate::drive::DriveRecord;
use crate::encryption::{EncryptedRecord, UnlockOutcome};
use crate::error::DeviceError;
use crate::events::{EventBus, EventStream};
use crate::filesystem::FilesystemRecord;
use crate::object::{Interface, ObjectKey, ObjectKind, Properties, ServiceObject, classify};
use crate::service::{ServiceEvent, ServiceEventStream, ServiceHandle};
use crate::udisks::UDisksService;

/// A record that can be listed to consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Device {
    Filesystem(FilesystemRecord),
    Encrypted(EncryptedRecord),
}

impl Device {
    pub fn key(&self) -> &ObjectKey {
        match self {
            Device::Filesystem(fs) => fs.key(),
            Device::Encrypted(enc) => enc.key(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Device::Filesystem(fs) => fs.label(),
            Device::Encrypted(enc) => enc.label(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RegistryEvent {
    Added(FilesystemRecord),
    Removed(Device),
    EncryptedAdded(EncryptedRecord),
    Updated(Device),
    UnlockFinished { key: ObjectKey, cleartext: ObjectKey },
    UnlockFailed { key: ObjectKey, message: String },
}

enum RegistryState {
    /// The service could not be reached; the registry stays empty.
    Disabled,
    Active {
        service: ServiceHandle,
        /// `None` once the service closed the notification stream.
        events: Option<ServiceEventStream>,
    },
}

enum Step {
    Notification(ServiceEvent),
    Unlock(ObjectKey, UnlockOutcome),
    StreamClosed,
}

type PendingUnlock = BoxFuture<'static, (ObjectKey, UnlockOutcome)>;

pub struct DeviceRegistry {
    state: RegistryState,
    power_off_gate: PowerOffGate,
    drives: HashMap<ObjectKey, DriveRecord>,
    devices: HashMap<ObjectKey, FilesystemRecord>,
    encrypted: HashMap<ObjectKey, EncryptedRecord>,
    /// Encrypted volumes hidden because their cleartext filesystem is tracked.
    unlocked: HashMap<ObjectKey, EncryptedRecord>,
    pending_unlocks: FuturesUnordered<PendingUnlock>,
    bus: EventBus<RegistryEvent>,
}

impl DeviceRegistry {
    /// Connect to UDisks2 on the configured bus.
    ///
    /// Never fails: when the service is unreachable the registry is disabled
    /// and behaves as permanently empty.
    pub async fn connect(config: &RegistryConfig) -> Self {
        let service: ServiceHandle = match UDisksService::connect(config.bus).await {
            Ok(service) => Arc::new(service),
            Err(e) => {
                debug!("No UDisks2 service found: {e}");
                return Self::disabled_with(config);
            }
        };

        match Self::with_config(service, config).await {
            Ok(registry) => registry,
            Err(e) => {
                debug!("Could not subscribe to UDisks2 notifications: {e}");
                Self::disabled_with(config)
            }
        }
    }

    pub async fn new(service: ServiceHandle) -> Result<Self, DeviceError> {
        Self::with_config(service, &RegistryConfig::default()).await
    }

    pub async fn with_config(
        service: ServiceHandle,
        config: &RegistryConfig,
    ) -> Result<Self, DeviceError> {
        let events = service.subscribe().await?;
        let mut registry = Self::disabled_with(config);
        registry.state = RegistryState::Active {
            service,
            events: Some(events),
        };
        Ok(registry)
    }

    pub fn disabled() -> Self {
        Self::disabled_with(&RegistryConfig::default())
    }

    fn disabled_with(config: &RegistryConfig) -> Self {
        Self {
            state: RegistryState::Disabled,
            power_off_gate: config.power_off_gate,
            drives: HashMap::new(),
            devices: HashMap::new(),
            encrypted: HashMap::new(),
            unlocked: HashMap::new(),
            pending_unlocks: FuturesUnordered::new(),
            bus: EventBus::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RegistryState::Active { .. })
    }

    pub fn subscribe(&mut self) -> EventStream<RegistryEvent> {
        self.bus.subscribe()
    }

    fn service(&self) -> Option<ServiceHandle> {
        match &self.state {
            RegistryState::Disabled => None,
            RegistryState::Active { service, .. } => Some(service.clone()),
        }
    }

    /// Classify every object the service currently knows about.
    ///
    /// Returns how many objects were looked at; 0 when disabled.
    pub async fn scan(&mut self) -> Result<usize, DeviceError> {
        let Some(service) = self.service() else {
            return Ok(0);
        };

        let objects = service.managed_objects().await?;
        info!("Scanning {} UDisks2 objects", objects.len());
        for object in &objects {
            self.add_object(object);
        }
        Ok(objects.len())
    }

    /// Wait for the next notification or unlock completion and apply it.
    ///
    /// Returns false once there is nothing left to wait for.
    pub async fn process_next(&mut self) -> bool {
        let step = match &mut self.state {
            RegistryState::Disabled => return false,
            RegistryState::Active {
                events: Some(events),
                ..
            } => {
                tokio::select! {
                    maybe_event = events.recv() => match maybe_event {
                        Some(event) => Step::Notification(event),
                        None => Step::StreamClosed,
                    },
                    Some((key, outcome)) = self.pending_unlocks.next(), if !self.pending_unlocks.is_empty() => {
                        Step::Unlock(key, outcome)
                    }
                }
            }
            RegistryState::Active { events: None, .. } => match self.pending_unlocks.next().await {
                Some((key, outcome)) => Step::Unlock(key, outcome),
                None => return false,
            },
        };

        match step {
            Step::Notification(event) => self.handle_event(event),
            Step::Unlock(key, outcome) => self.finish_unlock(key, outcome),
            Step::StreamClosed => {
                info!("UDisks2 notification stream closed");
                if let RegistryState::Active { events, .. } = &mut self.state {
                    *events = None;
                }
                return !self.pending_unlocks.is_empty();
            }
        }
        true
    }

    /// Process notifications until the service stops sending them.
    pub async fn run(&mut self) {
        while self.process_next().await {}
    }

    /// Apply one service notification.
    pub fn handle_event(&mut self, event: ServiceEvent) {
        if !self.is_active() {
            return;
        }

        match event {
            ServiceEvent::ObjectAdded(object) => self.add_object(&object),
            ServiceEvent::ObjectRemoved(object) => self.remove_object(&object),
            ServiceEvent::PropertiesChanged {
                key,
                interface,
                changed,
            } => self.properties_changed(&key, interface, &changed),
        }
    }

    fn add_object(&mut self, object: &ServiceObject) {
        let Some(service) = self.service() else {
            return;
        };
        let key = object.key().clone();

        match classify(object) {
            ObjectKind::Drive => {
                let drive = DriveRecord::from_object(object, service);
                debug!("Drive added: {:?}", drive);
                self.drives.insert(key, drive);
            }
            ObjectKind::Filesystem => {
                let record = FilesystemRecord::from_object(object, service);
                debug!("Filesystem added: {:?}", record);
                if self.devices.insert(key.clone(), record.clone()).is_some() {
                    self.bus
                        .emit(RegistryEvent::Updated(Device::Filesystem(record)));
                } else {
                    self.bus.emit(RegistryEvent::Added(record));
                }
                self.reconcile_cleartext(&key);
            }
            ObjectKind::Encrypted => {
                let record = EncryptedRecord::from_object(object, service);
                debug!("Encrypted volume added: {:?}", record);

                // Not shown to consumers yet: keep it hidden behind its filesystem.
                let parked = self.unlocked.remove(&key).is_some();
                let visible = self.encrypted.contains_key(&key);
                if (parked || !visible) && self.shows_as_filesystem(&record) {
                    self.unlocked.insert(key, record);
                    return;
                }

                let replaced = self.encrypted.insert(key.clone(), record.clone()).is_some();
                if self.reconcile_encrypted(&key) {
                    return;
                }
                if replaced {
                    self.bus
                        .emit(RegistryEvent::Updated(Device::Encrypted(record)));
                } else if record.is_locked() {
                    self.bus.emit(RegistryEvent::EncryptedAdded(record));
                }
            }
            ObjectKind::Unsupported => {
                debug!("Ignoring object {key}");
            }
        }
    }

    fn remove_object(&mut self, object: &ServiceObject) {
        let key = object.key();

        match classify(object) {
            ObjectKind::Drive => {
                if self.drives.remove(key).is_none() {
                    debug!("Removed drive {key} was not tracked");
                }
            }
            ObjectKind::Filesystem => match self.devices.remove(key) {
                Some(record) => {
                    debug!("Filesystem removed: {key}");
                    self.bus
                        .emit(RegistryEvent::Removed(Device::Filesystem(record)));
                }
                None => debug!("Removed filesystem {key} was not tracked"),
            },
            ObjectKind::Encrypted => {
                if self.unlocked.remove(key).is_some() {
                    debug!("Unlocked encrypted volume {key} went away");
                    return;
                }
                // Already gone when it was reconciled against its cleartext device.
                let Some(record) = self.encrypted.remove(key) else {
                    return;
                };
                debug!("Encrypted volume removed: {key}");
                self.bus
                    .emit(RegistryEvent::Removed(Device::Encrypted(record)));
            }
            ObjectKind::Unsupported => {}
        }
    }

    fn properties_changed(&mut self, key: &ObjectKey, interface: Interface, changed: &Properties) {
        if let Some(record) = self.devices.get_mut(key) {
            if record.apply_changes(interface, changed) {
                let record = record.clone();
                self.bus
                    .emit(RegistryEvent::Updated(Device::Filesystem(record)));
            }
            return;
        }

        if let Some(record) = self.encrypted.get_mut(key) {
            if record.apply_changes(interface, changed) {
                let record = record.clone();
                if !self.reconcile_encrypted(key) {
                    self.bus
                        .emit(RegistryEvent::Updated(Device::Encrypted(record)));
                }
            }
            return;
        }

        if let Some(record) = self.unlocked.get_mut(key)
            && record.apply_changes(interface, changed)
        {
            let still_unlocked = record
                .cleartext_device
                .as_ref()
                .is_some_and(|cleartext| self.devices.contains_key(cleartext));
            if still_unlocked {
                return;
            }

            let Some(record) = self.unlocked.remove(key) else {
                return;
            };
            info!("Encrypted volume {key} is locked again");
            self.encrypted.insert(key.clone(), record.clone());
            if record.is_locked() {
                self.bus.emit(RegistryEvent::EncryptedAdded(record));
            }
        }
    }

    fn shows_as_filesystem(&self, record: &EncryptedRecord) -> bool {
        record
            .cleartext_device
            .as_ref()
            .is_some_and(|cleartext| self.devices.contains_key(cleartext))
    }

    /// Hide the encrypted volume `key` if its cleartext device is a tracked
    /// filesystem. Returns true if it was hidden.
    fn reconcile_encrypted(&mut self, key: &ObjectKey) -> bool {
        let unlocked = self
            .encrypted
            .get(key)
            .is_some_and(|record| self.shows_as_filesystem(record));
        if !unlocked {
            return false;
        }

        let Some(record) = self.encrypted.remove(key) else {
            return false;
        };
        debug!(
            "Encrypted volume {key} is unlocked as {:?}",
            record.cleartext_device
        );
        self.bus
            .emit(RegistryEvent::Removed(Device::Encrypted(record.clone())));
        self.unlocked.insert(key.clone(), record);
        true
    }

    /// Hide every encrypted volume whose cleartext device is `cleartext`.
    fn reconcile_cleartext(&mut self, cleartext: &ObjectKey) {
        let keys: Vec<ObjectKey> = self
            .encrypted
            .iter()
            .filter(|(_, record)| record.cleartext_device.as_ref() == Some(cleartext))
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys {
            self.reconcile_encrypted(&key);
        }
    }

    /// Start unlocking a tracked encrypted volume.
    ///
    /// The outcome is delivered by [`Self::process_next`] as
    /// [`RegistryEvent::UnlockFinished`] or [`RegistryEvent::UnlockFailed`].
    pub fn unlock(
        &mut self,
        key: &ObjectKey,
        passphrase: impl Into<String>,
    ) -> Result<(), DeviceError> {
        let record = self
            .encrypted
            .get(key)
            .ok_or_else(|| DeviceError::NotFound(key.to_string()))?;

        let request = record.unlock(passphrase);
        let key = request.key().clone();
        self.pending_unlocks
            .push(Box::pin(async move { (key, request.await) }));
        Ok(())
    }

    fn finish_unlock(&mut self, key: ObjectKey, outcome: UnlockOutcome) {
        match outcome {
            UnlockOutcome::Finished { cleartext } => {
                self.bus
                    .emit(RegistryEvent::UnlockFinished { key, cleartext });
            }
            UnlockOutcome::Failed { message } => {
                self.bus.emit(RegistryEvent::UnlockFailed { key, message });
            }
        }
    }

    /// The drive a filesystem sits on, if it is tracked.
    pub fn drive_for(&self, device: &FilesystemRecord) -> Option<&DriveRecord> {
        device.drive().and_then(|key| self.drives.get(key))
    }

    /// True if the device's drive can be both ejected and powered off.
    pub fn can_remove_drive(&self, device: &FilesystemRecord) -> bool {
        self.drive_for(device).is_some_and(DriveRecord::is_removable)
    }

    /// Eject the device's drive if it is ejectable, then power it off as
    /// allowed by the configured [`PowerOffGate`]. Untracked drives are ignored.
    pub async fn remove_drive(&self, device: &FilesystemRecord) -> Result<(), DeviceError> {
        let Some(drive) = self.drive_for(device).cloned() else {
            debug!("No tracked drive for {}", device.key());
            return Ok(());
        };

        if drive.is_ejectable {
            drive.eject().await?;
        }
        if self.power_off_gate.allows(drive.can_power_off) {
            drive.power_off().await?;
        }
        Ok(())
    }

    fn filesystem_or_not_found(&self, key: &ObjectKey) -> Result<FilesystemRecord, DeviceError> {
        self.devices
            .get(key)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(key.to_string()))
    }

    pub async fn mount(&self, key: &ObjectKey) -> Result<String, DeviceError> {
        self.filesystem_or_not_found(key)?.mount().await
    }

    pub async fn unmount(&self, key: &ObjectKey) -> Result<(), DeviceError> {
        self.filesystem_or_not_found(key)?.unmount().await
    }

    pub async fn remove_drive_by_key(&self, key: &ObjectKey) -> Result<(), DeviceError> {
        let device = self.filesystem_or_not_found(key)?;
        self.remove_drive(&device).await
    }

    pub fn drives(&self) -> impl Iterator<Item = &DriveRecord> {
        self.drives.values()
    }

    pub fn filesystems(&self) -> impl Iterator<Item = &FilesystemRecord> {
        self.devices.values()
    }

    /// Encrypted volumes that are visible, i.e. not shown through a cleartext filesystem.
    pub fn encrypted(&self) -> impl Iterator<Item = &EncryptedRecord> {
        self.encrypted.values()
    }

    pub fn drive(&self, key: &ObjectKey) -> Option<&DriveRecord> {
        self.drives.get(key)
    }

    pub fn filesystem(&self, key: &ObjectKey) -> Option<&FilesystemRecord> {
        self.devices.get(key)
    }

    pub fn encrypted_volume(&self, key: &ObjectKey) -> Option<&EncryptedRecord> {
        self.encrypted.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeService, drive_object, encrypted_object, filesystem_object};

    const DRIVE: &str = "/org/freedesktop/UDisks2/drives/SanDisk_Cruzer";
    const SDB1: &str = "/org/freedesktop/UDisks2/block_devices/sdb1";
    const SDC1: &str = "/org/freedesktop/UDisks2/block_devices/sdc1";
    const DM0: &str = "/org/freedesktop/UDisks2/block_devices/dm_2d0";

    async fn active(fake: &FakeService) -> (DeviceRegistry, EventStream<RegistryEvent>) {
        let mut registry = DeviceRegistry::new(fake.handle()).await.unwrap();
        let events = registry.subscribe();
        (registry, events)
    }

    fn fs_on_drive(key: &str) -> ServiceObject {
        filesystem_object(key, Some("USB"), Some(DRIVE), Vec::new())
    }

    fn cleartext_changed(key: &str, cleartext: &str) -> ServiceEvent {
        ServiceEvent::PropertiesChanged {
            key: key.into(),
            interface: Interface::Encrypted,
            changed: Properties::new().with("CleartextDevice", ObjectKey::from(cleartext)),
        }
    }

    fn kinds(events: &[RegistryEvent]) -> Vec<(&'static str, String)> {
        events
            .iter()
            .map(|event| match event {
                RegistryEvent::Added(fs) => ("added", fs.key().to_string()),
                RegistryEvent::Removed(dev) => ("removed", dev.key().to_string()),
                RegistryEvent::EncryptedAdded(enc) => ("encrypted-added", enc.key().to_string()),
                RegistryEvent::Updated(dev) => ("updated", dev.key().to_string()),
                RegistryEvent::UnlockFinished { key, .. } => ("unlock-finished", key.to_string()),
                RegistryEvent::UnlockFailed { key, .. } => ("unlock-failed", key.to_string()),
            })
            .collect()
    }

    #[tokio::test]
    async fn drives_are_tracked_silently() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;

        registry.handle_event(ServiceEvent::ObjectAdded(drive_object(DRIVE, true, true)));
        assert!(registry.drive(&DRIVE.into()).is_some());

        registry.handle_event(ServiceEvent::ObjectRemoved(drive_object(DRIVE, true, true)));
        assert!(registry.drive(&DRIVE.into()).is_none());
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn filesystem_lifecycle_emits_added_then_removed() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;

        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        registry.handle_event(ServiceEvent::ObjectRemoved(fs_on_drive(SDB1)));

        assert_eq!(
            kinds(&events.drain()),
            vec![("added", SDB1.to_string()), ("removed", SDB1.to_string())]
        );
        assert_eq!(registry.filesystems().count(), 0);
    }

    #[tokio::test]
    async fn mount_point_change_is_forwarded() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        events.drain();

        registry.handle_event(ServiceEvent::PropertiesChanged {
            key: SDB1.into(),
            interface: Interface::Filesystem,
            changed: Properties::new().with("MountPoints", vec![b"/media/usb\0".to_vec()]),
        });

        match events.drain().as_slice() {
            [RegistryEvent::Updated(Device::Filesystem(fs))] => {
                assert_eq!(fs.mount_point.as_deref(), Some("/media/usb"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(
            registry.filesystem(&SDB1.into()).unwrap().mount_point.as_deref(),
            Some("/media/usb")
        );
    }

    #[tokio::test]
    async fn locked_volume_is_announced_once() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;

        registry.handle_event(ServiceEvent::ObjectAdded(encrypted_object(SDC1, "/")));
        registry.handle_event(ServiceEvent::ObjectAdded(encrypted_object(
            "/org/freedesktop/UDisks2/block_devices/sdd1",
            DM0,
        )));

        assert_eq!(
            kinds(&events.drain()),
            vec![("encrypted-added", SDC1.to_string())]
        );
    }

    #[tokio::test]
    async fn cleartext_filesystem_hides_encrypted_volume() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(encrypted_object(SDC1, "/")));
        registry.handle_event(cleartext_changed(SDC1, DM0));
        events.drain();

        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(DM0)));

        assert_eq!(
            kinds(&events.drain()),
            vec![("added", DM0.to_string()), ("removed", SDC1.to_string())]
        );
        assert!(registry.encrypted_volume(&SDC1.into()).is_none());

        // The later removal notification for the same object is a no-op.
        registry.handle_event(ServiceEvent::ObjectRemoved(encrypted_object(SDC1, DM0)));
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn property_change_hides_encrypted_volume() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(encrypted_object(SDC1, "/")));
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(DM0)));
        events.drain();

        registry.handle_event(cleartext_changed(SDC1, DM0));

        assert_eq!(kinds(&events.drain()), vec![("removed", SDC1.to_string())]);
        assert_eq!(registry.encrypted().count(), 0);
    }

    #[tokio::test]
    async fn relocked_volume_is_announced_again() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(encrypted_object(SDC1, "/")));
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(DM0)));
        registry.handle_event(cleartext_changed(SDC1, DM0));
        events.drain();

        registry.handle_event(ServiceEvent::ObjectRemoved(fs_on_drive(DM0)));
        registry.handle_event(cleartext_changed(SDC1, "/"));

        assert_eq!(
            kinds(&events.drain()),
            vec![
                ("removed", DM0.to_string()),
                ("encrypted-added", SDC1.to_string())
            ]
        );
        assert!(registry.encrypted_volume(&SDC1.into()).unwrap().is_locked());
    }

    #[tokio::test]
    async fn unknown_removals_are_no_ops() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;

        registry.handle_event(ServiceEvent::ObjectRemoved(drive_object(DRIVE, true, true)));
        registry.handle_event(ServiceEvent::ObjectRemoved(fs_on_drive(SDB1)));
        registry.handle_event(ServiceEvent::ObjectRemoved(encrypted_object(SDC1, "/")));

        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn rescanning_does_not_duplicate_entries() {
        let fake = FakeService::default();
        fake.set_objects(vec![
            drive_object(DRIVE, true, true),
            fs_on_drive(SDB1),
            encrypted_object(SDC1, "/"),
        ]);
        let (mut registry, mut events) = active(&fake).await;

        assert_eq!(registry.scan().await.unwrap(), 3);
        assert_eq!(
            kinds(&events.drain()),
            vec![
                ("added", SDB1.to_string()),
                ("encrypted-added", SDC1.to_string())
            ]
        );

        registry.scan().await.unwrap();
        assert_eq!(
            kinds(&events.drain()),
            vec![("updated", SDB1.to_string()), ("updated", SDC1.to_string())]
        );
        assert_eq!(registry.filesystems().count(), 1);
    }

    #[tokio::test]
    async fn scan_with_cleartext_first_keeps_volume_hidden() {
        let fake = FakeService::default();
        fake.set_objects(vec![fs_on_drive(DM0), encrypted_object(SDC1, DM0)]);
        let (mut registry, mut events) = active(&fake).await;

        registry.scan().await.unwrap();
        assert_eq!(kinds(&events.drain()), vec![("added", DM0.to_string())]);
        assert!(registry.encrypted_volume(&SDC1.into()).is_none());

        // Once the cleartext device goes away the volume shows up as locked.
        registry.handle_event(ServiceEvent::ObjectRemoved(fs_on_drive(DM0)));
        registry.handle_event(cleartext_changed(SDC1, "/"));
        assert_eq!(
            kinds(&events.drain()),
            vec![
                ("removed", DM0.to_string()),
                ("encrypted-added", SDC1.to_string())
            ]
        );
    }

    #[tokio::test]
    async fn disabled_registry_is_empty() {
        let mut registry = DeviceRegistry::disabled();
        let mut events = registry.subscribe();

        assert!(!registry.is_active());
        assert_eq!(registry.scan().await.unwrap(), 0);
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        assert!(!registry.process_next().await);

        assert_eq!(registry.filesystems().count(), 0);
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn can_remove_drive_needs_both_flags() {
        let fake = FakeService::default();
        let (mut registry, _events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        let device = registry.filesystem(&SDB1.into()).unwrap().clone();

        assert!(!registry.can_remove_drive(&device), "drive not tracked yet");

        for (ejectable, can_power_off, expected) in [
            (true, true, true),
            (true, false, false),
            (false, true, false),
            (false, false, false),
        ] {
            registry.handle_event(ServiceEvent::ObjectAdded(drive_object(
                DRIVE,
                ejectable,
                can_power_off,
            )));
            assert_eq!(registry.can_remove_drive(&device), expected);
        }
    }

    #[tokio::test]
    async fn remove_drive_follows_power_off_gate() {
        let fake = FakeService::default();
        let (mut registry, _events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        registry.handle_event(ServiceEvent::ObjectAdded(drive_object(DRIVE, true, true)));
        let device = registry.filesystem(&SDB1.into()).unwrap().clone();

        registry.remove_drive(&device).await.unwrap();
        assert_eq!(fake.take_calls(), vec![Call::Eject(DRIVE.into())]);

        registry.handle_event(ServiceEvent::ObjectAdded(drive_object(DRIVE, false, false)));
        registry.remove_drive(&device).await.unwrap();
        assert_eq!(fake.take_calls(), vec![Call::PowerOff(DRIVE.into())]);

        let config = RegistryConfig {
            power_off_gate: PowerOffGate::WhenSupported,
            ..Default::default()
        };
        let mut gated = DeviceRegistry::with_config(fake.handle(), &config).await.unwrap();
        gated.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        gated.handle_event(ServiceEvent::ObjectAdded(drive_object(DRIVE, true, true)));
        gated.remove_drive(&device).await.unwrap();
        assert_eq!(
            fake.take_calls(),
            vec![Call::Eject(DRIVE.into()), Call::PowerOff(DRIVE.into())]
        );
    }

    #[tokio::test]
    async fn remove_drive_without_drive_is_a_no_op() {
        let fake = FakeService::default();
        let (mut registry, _events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        let device = registry.filesystem(&SDB1.into()).unwrap().clone();

        registry.remove_drive(&device).await.unwrap();
        assert!(fake.take_calls().is_empty());
    }

    #[tokio::test]
    async fn eject_failure_stops_removal() {
        let fake = FakeService::default();
        fake.set_eject_result(Err("Device is busy".to_string()));
        let (mut registry, _events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        registry.handle_event(ServiceEvent::ObjectAdded(drive_object(DRIVE, true, false)));

        let err = registry.remove_drive_by_key(&SDB1.into()).await.unwrap_err();
        assert!(err.to_string().contains("Device is busy"));
        assert_eq!(fake.take_calls(), vec![Call::Eject(DRIVE.into())]);
    }

    #[tokio::test]
    async fn actions_on_unknown_keys_are_not_found() {
        let fake = FakeService::default();
        let (mut registry, _events) = active(&fake).await;

        assert!(matches!(
            registry.mount(&SDB1.into()).await,
            Err(DeviceError::NotFound(_))
        ));
        assert!(matches!(
            registry.unlock(&SDC1.into(), "secret"),
            Err(DeviceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unlock_completion_is_delivered_by_process_next() {
        let fake = FakeService::default();
        fake.set_unlock_result(Ok(DM0.to_string()));
        let (mut registry, mut events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(encrypted_object(SDC1, "/")));
        events.drain();

        registry.unlock(&SDC1.into(), "secret").unwrap();
        assert!(events.drain().is_empty(), "unlock does not complete inline");

        assert!(registry.process_next().await);
        match events.drain().as_slice() {
            [RegistryEvent::UnlockFinished { key, cleartext }] => {
                assert_eq!(key.as_str(), SDC1);
                assert_eq!(cleartext.as_str(), DM0);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unlock_failure_is_reported_as_event() {
        let fake = FakeService::default();
        fake.set_unlock_result(Err("Incorrect passphrase".to_string()));
        let (mut registry, mut events) = active(&fake).await;
        registry.handle_event(ServiceEvent::ObjectAdded(encrypted_object(SDC1, "/")));
        events.drain();

        registry.unlock(&SDC1.into(), "wrong").unwrap();
        fake.close();
        // Stream end is seen first or after the unlock; either way the unlock is delivered.
        while registry.process_next().await {}

        match events.drain().as_slice() {
            [RegistryEvent::UnlockFailed { key, message }] => {
                assert_eq!(key.as_str(), SDC1);
                assert!(message.contains("Incorrect passphrase"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(registry.encrypted_volume(&SDC1.into()).is_some());
    }

    #[tokio::test]
    async fn process_next_applies_notifications_in_order() {
        let fake = FakeService::default();
        let (mut registry, mut events) = active(&fake).await;

        fake.push(ServiceEvent::ObjectAdded(fs_on_drive(SDB1)));
        fake.push(ServiceEvent::ObjectRemoved(fs_on_drive(SDB1)));
        fake.close();
        registry.run().await;

        assert_eq!(
            kinds(&events.drain()),
            vec![("added", SDB1.to_string()), ("removed", SDB1.to_string())]
        );
    }
}
