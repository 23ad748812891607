// SPDX-License-Identifier: GPL-3.0-only

//! Service-side object model: keys, interfaces, cached properties and classification.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

const UDISKS2_IFACE_PREFIX: &str = "org.freedesktop.UDisks2.";

/// Stable identity the service assigns to each object (its D-Bus object path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// The null object path, used by UDisks2 for "no such object".
    pub const NONE: &'static str = "/";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == Self::NONE
    }

    /// `None` for the null path, otherwise the key itself.
    pub fn into_reference(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ObjectKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The UDisks2 interfaces this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interface {
    Drive,
    Block,
    Filesystem,
    Encrypted,
}

impl Interface {
    pub const ALL: [Interface; 4] = [
        Interface::Drive,
        Interface::Block,
        Interface::Filesystem,
        Interface::Encrypted,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            Interface::Drive => "Drive",
            Interface::Block => "Block",
            Interface::Filesystem => "Filesystem",
            Interface::Encrypted => "Encrypted",
        }
    }

    pub fn dbus_name(self) -> String {
        format!("{UDISKS2_IFACE_PREFIX}{}", self.short_name())
    }

    pub fn from_dbus_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix(UDISKS2_IFACE_PREFIX)?;
        Self::ALL.into_iter().find(|iface| iface.short_name() == short)
    }
}

/// A cached property value, reduced to the shapes UDisks2 uses for the
/// properties this crate reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Str(String),
    ObjectPath(ObjectKey),
    Bytes(Vec<u8>),
    ByteArrays(Vec<Vec<u8>>),
    Other,
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<ObjectKey> for PropertyValue {
    fn from(value: ObjectKey) -> Self {
        Self::ObjectPath(value)
    }
}

impl From<Vec<Vec<u8>>> for PropertyValue {
    fn from(value: Vec<Vec<u8>>) -> Self {
        Self::ByteArrays(value)
    }
}

/// Property name to value map of one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(HashMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<PropertyValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Overwrite cached values with a change batch.
    pub fn merge(&mut self, changed: &Properties) {
        for (name, value) in &changed.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            PropertyValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// String property; empty strings count as absent.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            PropertyValue::Str(value) if !value.is_empty() => Some(value.as_str()),
            _ => None,
        }
    }

    /// Object path property; the null path counts as absent.
    pub fn get_reference(&self, name: &str) -> Option<ObjectKey> {
        match self.get(name)? {
            PropertyValue::ObjectPath(key) => key.clone().into_reference(),
            _ => None,
        }
    }

    pub fn get_byte_arrays(&self, name: &str) -> Option<&[Vec<u8>]> {
        match self.get(name)? {
            PropertyValue::ByteArrays(value) => Some(value.as_slice()),
            _ => None,
        }
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Snapshot of one service object and the interfaces it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceObject {
    key: ObjectKey,
    interfaces: BTreeMap<Interface, Properties>,
}

impl ServiceObject {
    pub fn new(key: impl Into<ObjectKey>) -> Self {
        Self {
            key: key.into(),
            interfaces: BTreeMap::new(),
        }
    }

    pub fn with_interface(mut self, interface: Interface, properties: Properties) -> Self {
        self.interfaces.insert(interface, properties);
        self
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Cached properties of `interface`, if the object exposes it.
    pub fn capability(&self, interface: Interface) -> Option<&Properties> {
        self.interfaces.get(&interface)
    }

    pub fn capability_mut(&mut self, interface: Interface) -> Option<&mut Properties> {
        self.interfaces.get_mut(&interface)
    }

    pub fn has(&self, interface: Interface) -> bool {
        self.interfaces.contains_key(&interface)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = Interface> + '_ {
        self.interfaces.keys().copied()
    }

    pub fn insert_interface(&mut self, interface: Interface, properties: Properties) {
        self.interfaces.insert(interface, properties);
    }

    pub fn remove_interface(&mut self, interface: Interface) -> Option<Properties> {
        self.interfaces.remove(&interface)
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

/// What a service object is tracked as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Drive,
    Filesystem,
    Encrypted,
    Unsupported,
}

/// Classify an object by the first matching capability: drive, then
/// filesystem, then encrypted.
pub fn classify(object: &ServiceObject) -> ObjectKind {
    if object.has(Interface::Drive) {
        ObjectKind::Drive
    } else if object.has(Interface::Filesystem) {
        ObjectKind::Filesystem
    } else if object.has(Interface::Encrypted) {
        ObjectKind::Encrypted
    } else {
        ObjectKind::Unsupported
    }
}
