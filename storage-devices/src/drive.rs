// SPDX-License-Identifier: GPL-3.0-only

//! Physical drives and their eject/power-off actions

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::error::DeviceError;
use crate::object::{Interface, ObjectKey, ServiceObject};
use crate::service::ServiceHandle;

const ID: &str = "Id";
const EJECTABLE: &str = "Ejectable";
const CAN_POWER_OFF: &str = "CanPowerOff";

/// A drive as reported when it appeared. Drives are not refreshed afterwards.
#[derive(Clone, Serialize)]
pub struct DriveRecord {
    pub key: ObjectKey,
    pub uuid: String,
    pub is_ejectable: bool,
    pub can_power_off: bool,
    #[serde(skip)]
    service: ServiceHandle,
}

impl DriveRecord {
    pub fn from_object(object: &ServiceObject, service: ServiceHandle) -> Self {
        let drive = object.capability(Interface::Drive);

        Self {
            key: object.key().clone(),
            uuid: drive
                .and_then(|p| p.get_str(ID))
                .unwrap_or_default()
                .to_string(),
            is_ejectable: drive.and_then(|p| p.get_bool(EJECTABLE)).unwrap_or(false),
            can_power_off: drive
                .and_then(|p| p.get_bool(CAN_POWER_OFF))
                .unwrap_or(false),
            service,
        }
    }

    /// Both ejectable and able to power off.
    pub fn is_removable(&self) -> bool {
        self.is_ejectable && self.can_power_off
    }

    pub async fn eject(&self) -> Result<(), DeviceError> {
        info!("Ejecting drive {}", self.key);
        self.service.drive_eject(self.key.clone()).await
    }

    pub async fn power_off(&self) -> Result<(), DeviceError> {
        info!("Powering off drive {}", self.key);
        self.service.drive_power_off(self.key.clone()).await
    }
}

impl fmt::Debug for DriveRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveRecord")
            .field("key", &self.key)
            .field("uuid", &self.uuid)
            .field("is_ejectable", &self.is_ejectable)
            .field("can_power_off", &self.can_power_off)
            .finish()
    }
}
