// SPDX-License-Identifier: GPL-3.0-only

//! Error types for storage-devices operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("The device registry is not connected to {0}")]
    NotConnected(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("D-Bus error: {0}")]
    DBusError(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Zbus Error")]
    ZbusError(#[from] zbus::Error),
}

impl DeviceError {
    pub(crate) fn operation(action: &str, err: impl std::fmt::Display) -> Self {
        Self::OperationFailed(format!("{action} failed: {err}"))
    }
}
