// SPDX-License-Identifier: GPL-3.0-only

//! Registry configuration, read from TOML.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Which message bus the UDisks2 service is reached on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

/// When `remove_drive` follows up with a power-off request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerOffGate {
    /// Only drives that report they cannot power off. This is the historical
    /// behavior and stays the default until the intended gating is settled.
    #[default]
    WhenUnsupported,
    /// Only drives that report they can power off.
    WhenSupported,
    Never,
}

impl PowerOffGate {
    pub fn allows(self, can_power_off: bool) -> bool {
        match self {
            PowerOffGate::WhenUnsupported => !can_power_off,
            PowerOffGate::WhenSupported => can_power_off,
            PowerOffGate::Never => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RegistryConfig {
    pub bus: BusKind,
    pub power_off_gate: PowerOffGate,
    pub scan_on_start: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::System,
            power_off_gate: PowerOffGate::default(),
            scan_on_start: true,
        }
    }
}

impl RegistryConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, DeviceError> {
        toml::from_str(raw).map_err(|e| DeviceError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DeviceError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            DeviceError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }
}
