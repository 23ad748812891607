// SPDX-License-Identifier: GPL-3.0-only

//! Identity, label and UUID shared by filesystem and encrypted records.

use serde::Serialize;

use crate::object::{Interface, ObjectKey, Properties, ServiceObject};

pub(crate) const ID_LABEL: &str = "IdLabel";
pub(crate) const ID_UUID: &str = "IdUUID";
pub(crate) const DRIVE: &str = "Drive";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub key: ObjectKey,
    /// Display label, falling back to the UUID.
    pub label: Option<String>,
    pub uuid: Option<String>,
    /// Drive backing this block, looked up by key in the registry.
    pub drive: Option<ObjectKey>,
    #[serde(skip)]
    cached: Properties,
}

impl BlockInfo {
    pub fn from_object(object: &ServiceObject) -> Self {
        let mut info = Self {
            key: object.key().clone(),
            label: None,
            uuid: None,
            drive: None,
            cached: object
                .capability(Interface::Block)
                .cloned()
                .unwrap_or_default(),
        };
        info.resolve();
        info
    }

    fn resolve(&mut self) {
        let block = &self.cached;
        self.label = block
            .get_str(ID_LABEL)
            .or_else(|| block.get_str(ID_UUID))
            .map(str::to_string);
        self.uuid = block.get_str(ID_UUID).map(str::to_string);
        self.drive = block.get_reference(DRIVE);
    }

    /// Label for presentation; empty when neither a label nor a UUID is known.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    /// Re-read label, UUID and drive after a `Block` property change.
    /// Returns true if anything derived from them changed.
    pub(crate) fn apply_changes(&mut self, changed: &Properties) -> bool {
        self.cached.merge(changed);
        if ![ID_LABEL, ID_UUID, DRIVE]
            .iter()
            .any(|name| changed.contains(name))
        {
            return false;
        }

        let before = (self.label.clone(), self.uuid.clone(), self.drive.clone());
        self.resolve();
        before != (self.label.clone(), self.uuid.clone(), self.drive.clone())
    }
}
