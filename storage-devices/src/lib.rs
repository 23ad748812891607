// SPDX-License-Identifier: GPL-3.0-only

//! Live view of removable storage tracked through UDisks2.
//!
//! [`DeviceRegistry`] keeps drives, mountable filesystems and locked
//! encrypted volumes in sync with the device-management service and
//! publishes [`RegistryEvent`]s to subscribers.

mod block;
mod config;
mod drive;
mod encryption;
mod events;
mod filesystem;
mod object;
mod registry;
mod service;
mod udisks;

// Error types
pub mod error;

// DBus byte string decoding
pub mod dbus;

#[cfg(test)]
mod fake;

pub use block::BlockInfo;
pub use config::{BusKind, PowerOffGate, RegistryConfig};
pub use drive::DriveRecord;
pub use encryption::{EncryptedRecord, UnlockOutcome, UnlockRequest};
pub use error::DeviceError;
pub use events::{EventBus, EventStream};
pub use filesystem::FilesystemRecord;
pub use object::{
    Interface, ObjectKey, ObjectKind, Properties, PropertyValue, ServiceObject, classify,
};
pub use registry::{Device, DeviceRegistry, RegistryEvent};
pub use service::{DeviceService, ServiceEvent, ServiceEventStream, ServiceHandle};
pub use udisks::UDisksService;
