// SPDX-License-Identifier: GPL-3.0-only

//! zvariant values to the crate's object model

use std::collections::HashMap;

use zbus::zvariant::{Array, OwnedValue, Value};

use super::proxy::InterfaceMap;
use crate::object::{Interface, ObjectKey, Properties, PropertyValue, ServiceObject};

pub(crate) fn property_value(value: &OwnedValue) -> PropertyValue {
    match &**value {
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::Str(s) => PropertyValue::Str(s.to_string()),
        Value::ObjectPath(path) => PropertyValue::ObjectPath(ObjectKey::from(path.as_str())),
        Value::Array(array) => match array.element_signature().to_string().as_str() {
            "y" => bytes(array).map_or(PropertyValue::Other, PropertyValue::Bytes),
            "ay" => array
                .iter()
                .map(|element| match element {
                    Value::Array(inner) => bytes(inner),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map_or(PropertyValue::Other, PropertyValue::ByteArrays),
            _ => PropertyValue::Other,
        },
        _ => PropertyValue::Other,
    }
}

fn bytes(array: &Array<'_>) -> Option<Vec<u8>> {
    array
        .iter()
        .map(|element| match element {
            Value::U8(byte) => Some(*byte),
            _ => None,
        })
        .collect()
}

pub(crate) fn properties(values: &HashMap<String, OwnedValue>) -> Properties {
    values
        .iter()
        .map(|(name, value)| (name.clone(), property_value(value)))
        .collect()
}

/// The known interfaces of an interface map; others are dropped.
pub(crate) fn interfaces(map: &InterfaceMap) -> Vec<(Interface, Properties)> {
    map.iter()
        .filter_map(|(name, values)| {
            Interface::from_dbus_name(name).map(|iface| (iface, properties(values)))
        })
        .collect()
}

pub(crate) fn service_object(key: ObjectKey, map: &InterfaceMap) -> ServiceObject {
    interfaces(map)
        .into_iter()
        .fold(ServiceObject::new(key), |object, (iface, props)| {
            object.with_interface(iface, props)
        })
}
