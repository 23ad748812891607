// SPDX-License-Identifier: GPL-3.0-only

//! Human and JSON rendering of registry state and events

use anyhow::Result;
use serde::Serialize;
use storage_devices::{
    Device, DeviceRegistry, DriveRecord, EncryptedRecord, FilesystemRecord, RegistryEvent,
};

#[derive(Serialize)]
struct ListView<'a> {
    drives: Vec<&'a DriveRecord>,
    filesystems: Vec<&'a FilesystemRecord>,
    encrypted: Vec<&'a EncryptedRecord>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Output {
    pub json: bool,
}

impl Output {
    pub(crate) fn event(self, event: &RegistryEvent) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{}", describe_event(event));
        }
        Ok(())
    }

    pub(crate) fn list(self, registry: &DeviceRegistry) -> Result<()> {
        let mut drives: Vec<&DriveRecord> = registry.drives().collect();
        drives.sort_by(|a, b| a.key.cmp(&b.key));
        let mut filesystems: Vec<&FilesystemRecord> = registry.filesystems().collect();
        filesystems.sort_by(|a, b| a.key().cmp(b.key()));
        let mut encrypted: Vec<&EncryptedRecord> = registry.encrypted().collect();
        encrypted.sort_by(|a, b| a.key().cmp(b.key()));

        if self.json {
            let view = ListView {
                drives,
                filesystems,
                encrypted,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
            return Ok(());
        }

        println!("Drives:");
        for drive in drives {
            println!("  {}", describe_drive(drive));
        }
        println!("Filesystems:");
        for fs in filesystems {
            let removable = if registry.can_remove_drive(fs) {
                "  (removable)"
            } else {
                ""
            };
            println!("  {}{removable}", describe_filesystem(fs));
        }
        println!("Locked volumes:");
        for enc in encrypted {
            println!("  {}", describe_encrypted(enc));
        }
        Ok(())
    }

    /// A single result line, e.g. the mount point after `mount`.
    pub(crate) fn value(self, name: &str, value: impl Serialize + std::fmt::Display) -> Result<()> {
        if self.json {
            let mut object = serde_json::Map::new();
            object.insert(name.to_string(), serde_json::to_value(&value)?);
            println!("{}", serde_json::Value::Object(object));
        } else {
            println!("{value}");
        }
        Ok(())
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

fn describe_drive(drive: &DriveRecord) -> String {
    format!(
        "{} id={} ejectable={} can-power-off={}",
        drive.key,
        or_dash(&drive.uuid),
        drive.is_ejectable,
        drive.can_power_off
    )
}

fn describe_filesystem(fs: &FilesystemRecord) -> String {
    format!(
        "{} label={} mount={}",
        fs.key(),
        or_dash(fs.label()),
        fs.mount_point.as_deref().unwrap_or("-")
    )
}

fn describe_encrypted(enc: &EncryptedRecord) -> String {
    let cleartext = enc
        .cleartext_device
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    format!("{} label={} cleartext={}", enc.key(), or_dash(enc.label()), cleartext)
}

fn describe_device(device: &Device) -> String {
    match device {
        Device::Filesystem(fs) => describe_filesystem(fs),
        Device::Encrypted(enc) => describe_encrypted(enc),
    }
}

pub(crate) fn describe_event(event: &RegistryEvent) -> String {
    match event {
        RegistryEvent::Added(fs) => format!("added           {}", describe_filesystem(fs)),
        RegistryEvent::Removed(device) => format!("removed         {}", describe_device(device)),
        RegistryEvent::EncryptedAdded(enc) => {
            format!("encrypted-added {}", describe_encrypted(enc))
        }
        RegistryEvent::Updated(device) => format!("updated         {}", describe_device(device)),
        RegistryEvent::UnlockFinished { key, cleartext } => {
            format!("unlocked        {key} cleartext={cleartext}")
        }
        RegistryEvent::UnlockFailed { key, message } => {
            format!("unlock-failed   {key} {message}")
        }
    }
}
