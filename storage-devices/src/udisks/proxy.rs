// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;

use zbus::zvariant;
use zbus_macros::proxy;

pub(crate) const UDISKS2_SERVICE: &str = "org.freedesktop.UDisks2";
pub(crate) const UDISKS2_ROOT: &str = "/org/freedesktop/UDisks2";

pub(crate) type InterfaceMap = HashMap<String, HashMap<String, zvariant::OwnedValue>>;

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2",
    interface = "org.freedesktop.DBus.ObjectManager"
)]
pub trait UDisks2ObjectManager {
    fn get_managed_objects(
        &self,
    ) -> zbus::Result<HashMap<zvariant::OwnedObjectPath, InterfaceMap>>;

    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces_and_properties: HashMap<String, HashMap<String, zvariant::OwnedValue>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}
