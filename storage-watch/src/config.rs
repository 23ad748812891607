// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use storage_devices::RegistryConfig;

const CONFIG_ENV: &str = "STORAGE_WATCH_CONFIG";
const APP_DIR: &str = "storage-watch";
const CONFIG_FILE: &str = "config.toml";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WatchConfig {
    #[serde(flatten)]
    pub registry: RegistryConfig,
    pub log_level: LoggingLevel,
    /// Also write a daily log file into this directory.
    pub log_dir: Option<PathBuf>,
}

/// Where the configuration comes from, and whether it has to exist.
#[derive(Debug, PartialEq, Eq)]
struct ConfigSource {
    path: PathBuf,
    required: bool,
}

impl WatchConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| anyhow!("invalid configuration: {e}"))
    }

    /// Load from `--config`, `$STORAGE_WATCH_CONFIG` or the XDG config
    /// directory, falling back to defaults when no default file exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(source) = locate(explicit, |name| std::env::var_os(name)) else {
            return Ok(Self::default());
        };

        let raw = match fs::read_to_string(&source.path) {
            Ok(raw) => raw,
            Err(e) if !source.required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow!("cannot read {}: {e}", source.path.display()));
            }
        };

        Self::from_toml_str(&raw).map_err(|e| anyhow!("{}: {e}", source.path.display()))
    }
}

fn locate(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<OsString>,
) -> Option<ConfigSource> {
    if let Some(path) = explicit {
        return Some(ConfigSource {
            path: path.to_path_buf(),
            required: true,
        });
    }

    if let Some(path) = env(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(ConfigSource {
            path: PathBuf::from(path),
            required: true,
        });
    }

    let config_home = env("XDG_CONFIG_HOME")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".config")))?;

    Some(ConfigSource {
        path: config_home.join(APP_DIR).join(CONFIG_FILE),
        required: false,
    })
}
