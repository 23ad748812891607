// SPDX-License-Identifier: GPL-3.0-only

//! [`DeviceService`] backed by the UDisks2 daemon over D-Bus.

mod convert;
mod proxy;
mod table;
mod watch;

use std::collections::HashMap;

use futures::future::BoxFuture;
use tracing::info;
use udisks2::{drive::DriveProxy, encrypted::EncryptedProxy, filesystem::FilesystemProxy};
use zbus::Connection;

use crate::config::BusKind;
use crate::error::DeviceError;
use crate::object::{ObjectKey, ServiceObject};
use crate::service::{DeviceService, ServiceEventStream};

use proxy::UDisks2ObjectManagerProxy;

pub struct UDisksService {
    connection: Connection,
}

impl UDisksService {
    /// Connect to the bus and check that UDisks2 answers.
    pub async fn connect(bus: BusKind) -> Result<Self, DeviceError> {
        let connection = match bus {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        }
        .map_err(|e| DeviceError::ConnectionFailed(e.to_string()))?;

        let object_manager = UDisks2ObjectManagerProxy::new(&connection)
            .await
            .map_err(|e| DeviceError::ConnectionFailed(e.to_string()))?;
        let objects = object_manager
            .get_managed_objects()
            .await
            .map_err(|e| DeviceError::NotConnected(e.to_string()))?;
        info!("Connected to UDisks2 ({} objects, {:?} bus)", objects.len(), bus);

        Ok(Self { connection })
    }
}

pub(crate) async fn fetch_objects(
    object_manager: &UDisks2ObjectManagerProxy<'_>,
) -> Result<Vec<ServiceObject>, DeviceError> {
    let objects = object_manager
        .get_managed_objects()
        .await
        .map_err(|e| DeviceError::DBusError(e.to_string()))?;

    Ok(objects
        .iter()
        .map(|(path, map)| convert::service_object(ObjectKey::from(path.as_str()), map))
        .filter(|object| !object.is_empty())
        .collect())
}

impl DeviceService for UDisksService {
    fn managed_objects(&self) -> BoxFuture<'_, Result<Vec<ServiceObject>, DeviceError>> {
        Box::pin(async move {
            let object_manager = UDisks2ObjectManagerProxy::new(&self.connection).await?;
            fetch_objects(&object_manager).await
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<ServiceEventStream, DeviceError>> {
        Box::pin(watch::spawn(self.connection.clone()))
    }

    fn drive_eject(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            let proxy = DriveProxy::builder(&self.connection)
                .path(key.as_str())?
                .build()
                .await?;
            proxy
                .eject(HashMap::new())
                .await
                .map_err(|e| DeviceError::operation("Eject", e))
        })
    }

    fn drive_power_off(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            let proxy = DriveProxy::builder(&self.connection)
                .path(key.as_str())?
                .build()
                .await?;
            proxy
                .power_off(HashMap::new())
                .await
                .map_err(|e| DeviceError::operation("Power off", e))
        })
    }

    fn filesystem_mount(&self, key: ObjectKey) -> BoxFuture<'_, Result<String, DeviceError>> {
        Box::pin(async move {
            let proxy = FilesystemProxy::builder(&self.connection)
                .path(key.as_str())?
                .build()
                .await?;
            proxy
                .mount(HashMap::new())
                .await
                .map_err(|e| DeviceError::operation("Mount", e))
        })
    }

    fn filesystem_unmount(&self, key: ObjectKey) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            let proxy = FilesystemProxy::builder(&self.connection)
                .path(key.as_str())?
                .build()
                .await?;
            proxy
                .unmount(HashMap::new())
                .await
                .map_err(|e| DeviceError::operation("Unmount", e))
        })
    }

    fn encrypted_unlock(
        &self,
        key: ObjectKey,
        passphrase: String,
    ) -> BoxFuture<'static, Result<ObjectKey, DeviceError>> {
        let connection = self.connection.clone();
        Box::pin(async move {
            let proxy = EncryptedProxy::builder(&connection)
                .path(key.as_str())?
                .build()
                .await?;
            let cleartext = proxy
                .unlock(&passphrase, HashMap::new())
                .await
                .map_err(|e| DeviceError::operation("Unlock", e))?;
            Ok(ObjectKey::from(cleartext.as_str()))
        })
    }
}
