// SPDX-License-Identifier: GPL-3.0-only

//! Local mirror of the UDisks2 object manager.
//!
//! UDisks2 signals interface-level changes. The registry wants object-level
//! lifecycle, so the table folds `InterfacesAdded`/`InterfacesRemoved` into
//! added/removed objects the way an object manager client would.

use std::collections::HashMap;

use tracing::debug;

use crate::object::{Interface, ObjectKey, ObjectKind, Properties, ServiceObject, classify};
use crate::service::ServiceEvent;

#[derive(Debug, Default)]
pub(crate) struct ObjectTable {
    objects: HashMap<ObjectKey, ServiceObject>,
}

impl ObjectTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the table with a `GetManagedObjects` snapshot.
    pub(crate) fn seed(&mut self, objects: impl IntoIterator<Item = ServiceObject>) {
        self.objects = objects
            .into_iter()
            .filter(|object| !object.is_empty())
            .map(|object| (object.key().clone(), object))
            .collect();
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn interfaces_added(
        &mut self,
        key: ObjectKey,
        added: Vec<(Interface, Properties)>,
    ) -> Vec<ServiceEvent> {
        if added.is_empty() {
            return Vec::new();
        }

        if !self.objects.contains_key(&key) {
            let object = added
                .into_iter()
                .fold(ServiceObject::new(key.clone()), |object, (iface, props)| {
                    object.with_interface(iface, props)
                });
            self.objects.insert(key, object.clone());
            return vec![ServiceEvent::ObjectAdded(object)];
        }
        let Some(object) = self.objects.get_mut(&key) else {
            return Vec::new();
        };

        let before = object.clone();
        for (iface, props) in added {
            debug!("{} gained {}", key, iface.short_name());
            object.insert_interface(iface, props);
        }
        reclassified(before, object.clone())
    }

    pub(crate) fn interfaces_removed(
        &mut self,
        key: &ObjectKey,
        removed: &[Interface],
    ) -> Vec<ServiceEvent> {
        let Some(object) = self.objects.get_mut(key) else {
            return Vec::new();
        };

        let before = object.clone();
        for iface in removed {
            object.remove_interface(*iface);
        }

        if object.is_empty() {
            self.objects.remove(key);
            return vec![ServiceEvent::ObjectRemoved(before)];
        }
        reclassified(before, object.clone())
    }

    pub(crate) fn properties_changed(
        &mut self,
        key: ObjectKey,
        interface: Interface,
        changed: Properties,
    ) -> Option<ServiceEvent> {
        let Some(props) = self
            .objects
            .get_mut(&key)
            .and_then(|object| object.capability_mut(interface))
        else {
            debug!("Ignoring {} change on unknown object {}", interface.short_name(), key);
            return None;
        };

        props.merge(&changed);
        Some(ServiceEvent::PropertiesChanged {
            key,
            interface,
            changed,
        })
    }
}

/// An object whose classification changed is reported as a new object.
fn reclassified(before: ServiceObject, after: ServiceObject) -> Vec<ServiceEvent> {
    let (old_kind, new_kind) = (classify(&before), classify(&after));
    if old_kind == new_kind {
        return Vec::new();
    }

    debug!("{} is now {:?} (was {:?})", after.key(), new_kind, old_kind);
    let mut events = Vec::with_capacity(2);
    if old_kind != ObjectKind::Unsupported {
        events.push(ServiceEvent::ObjectRemoved(before));
    }
    if new_kind != ObjectKind::Unsupported {
        events.push(ServiceEvent::ObjectAdded(after));
    }
    events
}
