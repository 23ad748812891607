// SPDX-License-Identifier: GPL-3.0-only

//! Mountable filesystems and their mount point

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::block::BlockInfo;
use crate::dbus::bytestring::first_mount_point;
use crate::error::DeviceError;
use crate::object::{Interface, ObjectKey, Properties, ServiceObject};
use crate::service::ServiceHandle;

pub(crate) const MOUNT_POINTS: &str = "MountPoints";

#[derive(Clone, Serialize)]
pub struct FilesystemRecord {
    #[serde(flatten)]
    pub block: BlockInfo,
    /// First non-empty entry of the service's mount point list.
    pub mount_point: Option<String>,
    #[serde(skip)]
    service: ServiceHandle,
}

impl FilesystemRecord {
    pub fn from_object(object: &ServiceObject, service: ServiceHandle) -> Self {
        let mount_point = object
            .capability(Interface::Filesystem)
            .and_then(|fs| fs.get_byte_arrays(MOUNT_POINTS))
            .and_then(first_mount_point);

        Self {
            block: BlockInfo::from_object(object),
            mount_point,
            service,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.block.key
    }

    pub fn drive(&self) -> Option<&ObjectKey> {
        self.block.drive.as_ref()
    }

    pub fn label(&self) -> &str {
        self.block.display_label()
    }

    pub fn is_mounted(&self) -> bool {
        self.mount_point.is_some()
    }

    /// Apply a property change batch for this object.
    ///
    /// Returns true when the record changed and consumers should be told.
    pub fn apply_changes(&mut self, interface: Interface, changed: &Properties) -> bool {
        match interface {
            Interface::Filesystem => match changed.get_byte_arrays(MOUNT_POINTS) {
                Some(mount_points) => self.recompute_mount_point(mount_points),
                None => false,
            },
            Interface::Block => self.block.apply_changes(changed),
            _ => false,
        }
    }

    /// Returns true if the resolved mount point changed.
    pub fn recompute_mount_point(&mut self, mount_points: &[Vec<u8>]) -> bool {
        let mount_point = first_mount_point(mount_points);
        if mount_point == self.mount_point {
            return false;
        }

        debug!(
            "Mount point of {} changed: {:?} -> {:?}",
            self.block.key, self.mount_point, mount_point
        );
        self.mount_point = mount_point;
        true
    }

    /// Mount through the service; resolves to the mount point it reports.
    pub async fn mount(&self) -> Result<String, DeviceError> {
        info!("Mounting {}", self.block.key);
        self.service.filesystem_mount(self.block.key.clone()).await
    }

    pub async fn unmount(&self) -> Result<(), DeviceError> {
        info!("Unmounting {}", self.block.key);
        self.service.filesystem_unmount(self.block.key.clone()).await
    }
}

impl fmt::Debug for FilesystemRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemRecord")
            .field("key", &self.block.key)
            .field("label", &self.block.label)
            .field("uuid", &self.block.uuid)
            .field("drive", &self.block.drive)
            .field("mount_point", &self.mount_point)
            .finish()
    }
}
