// SPDX-License-Identifier: GPL-3.0-only

//! storage-watch - live view of removable drives, filesystems and encrypted
//! volumes, with mount/unmount/unlock/remove actions on top of UDisks2.

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use storage_devices::{BusKind, DeviceRegistry, ObjectKey, RegistryConfig, RegistryEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

mod config;
mod logging;
mod output;

use config::{LoggingLevel, WatchConfig};
use output::Output;

const PASSPHRASE_ENV: &str = "STORAGE_WATCH_PASSPHRASE";

#[derive(Debug, Parser)]
#[command(name = "storage-watch", version)]
#[command(about = "Watch removable drives, filesystems and encrypted volumes")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Talk to UDisks2 on the session bus
    #[arg(long, global = true)]
    session_bus: bool,
    #[arg(long, global = true, value_enum)]
    log_level: Option<LoggingLevel>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print registry events until interrupted (default)
    Watch,
    /// Print drives, filesystems and locked volumes
    List,
    Mount {
        key: String,
    },
    Unmount {
        key: String,
    },
    /// Unlock an encrypted volume; the passphrase is read from
    /// $STORAGE_WATCH_PASSPHRASE or stdin
    Unlock {
        key: String,
    },
    /// Eject and power off the drive behind a filesystem
    RemoveDrive {
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = WatchConfig::load(cli.config.as_deref())?;
    if cli.session_bus {
        config.registry.bus = BusKind::Session;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    logging::init(config.log_level, config.log_dir.as_deref());

    tracing::info!("Starting storage-watch v{}", env!("CARGO_PKG_VERSION"));

    let mut registry = DeviceRegistry::connect(&config.registry).await;
    if !registry.is_active() {
        tracing::warn!("UDisks2 is not available, no devices will be shown");
    }

    let out = Output { json: cli.json };
    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(&mut registry, &config.registry, out).await,
        Command::List => {
            registry.scan().await?;
            out.list(&registry)
        }
        Command::Mount { key } => {
            registry.scan().await?;
            let mount_point = registry.mount(&ObjectKey::from(key)).await?;
            out.value("mount_point", mount_point)
        }
        Command::Unmount { key } => {
            registry.scan().await?;
            registry.unmount(&ObjectKey::from(key.as_str())).await?;
            out.value("unmounted", key)
        }
        Command::Unlock { key } => {
            registry.scan().await?;
            let passphrase = read_passphrase().await?;
            unlock(&mut registry, ObjectKey::from(key), passphrase, out).await
        }
        Command::RemoveDrive { key } => {
            registry.scan().await?;
            let key = ObjectKey::from(key);
            let device = registry
                .filesystem(&key)
                .cloned()
                .ok_or_else(|| anyhow!("no filesystem {key}"))?;
            out.value("removable", registry.can_remove_drive(&device))?;
            registry.remove_drive(&device).await?;
            Ok(())
        }
    }
}

async fn watch(registry: &mut DeviceRegistry, config: &RegistryConfig, out: Output) -> Result<()> {
    let mut events = registry.subscribe();
    if config.scan_on_start {
        let count = registry.scan().await?;
        tracing::debug!("Initial scan saw {count} objects");
    }

    loop {
        for event in events.drain() {
            out.event(&event)?;
        }

        tokio::select! {
            more = registry.process_next() => {
                if !more {
                    tracing::info!("No more device notifications");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    for event in events.drain() {
        out.event(&event)?;
    }
    Ok(())
}

async fn read_passphrase() -> Result<String> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        return Ok(passphrase);
    }

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(|e| anyhow!("cannot read passphrase from stdin: {e}"))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn unlock(
    registry: &mut DeviceRegistry,
    key: ObjectKey,
    passphrase: String,
    out: Output,
) -> Result<()> {
    let mut events = registry.subscribe();
    registry.unlock(&key, passphrase)?;

    while registry.process_next().await {
        for event in events.drain() {
            match &event {
                RegistryEvent::UnlockFinished { key: done, .. } if *done == key => {
                    return out.event(&event);
                }
                RegistryEvent::UnlockFailed { key: failed, message } if *failed == key => {
                    bail!("{message}");
                }
                _ => {}
            }
        }
    }
    bail!("UDisks2 went away before unlocking {key} finished")
}
