// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::message::Type as MessageType;
use zbus::zvariant::OwnedValue;
use zbus::{Connection, MatchRule, MessageStream};

use super::convert;
use super::proxy::{UDISKS2_ROOT, UDISKS2_SERVICE, UDisks2ObjectManagerProxy};
use super::table::ObjectTable;
use crate::error::DeviceError;
use crate::object::{Interface, ObjectKey};
use crate::service::{ServiceEvent, ServiceEventStream};

const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";
const EVENT_QUEUE: usize = 64;

/// Subscribe to UDisks2 signals and forward them as object-level events.
///
/// The signal streams are set up before the object table is seeded so no
/// change between the snapshot and the subscription is lost.
pub(crate) async fn spawn(connection: Connection) -> Result<ServiceEventStream, DeviceError> {
    let object_manager = UDisks2ObjectManagerProxy::new(&connection).await?;
    let mut added_stream = object_manager.receive_interfaces_added().await?;
    let mut removed_stream = object_manager.receive_interfaces_removed().await?;

    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender(UDISKS2_SERVICE)?
        .interface(PROPERTIES_IFACE)?
        .member("PropertiesChanged")?
        .path_namespace(UDISKS2_ROOT)?
        .build();
    let mut changed_stream =
        MessageStream::for_match_rule(rule, &connection, Some(EVENT_QUEUE)).await?;

    let mut table = ObjectTable::new();
    table.seed(super::fetch_objects(&object_manager).await?);
    debug!("Watching {} UDisks2 objects", table.len());

    let (sender, receiver) = mpsc::channel(EVENT_QUEUE);

    tokio::spawn(async move {
        loop {
            let events = tokio::select! {
                maybe_added = added_stream.next() => {
                    let Some(signal) = maybe_added else {
                        break;
                    };

                    match signal.args() {
                        Ok(args) => table.interfaces_added(
                            ObjectKey::from(args.object_path.as_str()),
                            convert::interfaces(&args.interfaces_and_properties),
                        ),
                        Err(e) => {
                            warn!("Failed to parse InterfacesAdded signal args: {e}");
                            continue;
                        }
                    }
                }
                maybe_removed = removed_stream.next() => {
                    let Some(signal) = maybe_removed else {
                        break;
                    };

                    match signal.args() {
                        Ok(args) => {
                            let removed: Vec<Interface> = args
                                .interfaces
                                .iter()
                                .filter_map(|name| Interface::from_dbus_name(name))
                                .collect();
                            table.interfaces_removed(
                                &ObjectKey::from(args.object_path.as_str()),
                                &removed,
                            )
                        }
                        Err(e) => {
                            warn!("Failed to parse InterfacesRemoved signal args: {e}");
                            continue;
                        }
                    }
                }
                maybe_changed = changed_stream.next() => {
                    let Some(message) = maybe_changed else {
                        break;
                    };

                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Failed to receive PropertiesChanged signal: {e}");
                            continue;
                        }
                    };
                    let Some(path) = message.header().path().map(|p| p.to_string()) else {
                        continue;
                    };

                    match message
                        .body()
                        .deserialize::<(String, HashMap<String, OwnedValue>, Vec<String>)>()
                    {
                        Ok((iface_name, changed, _invalidated)) => {
                            let Some(interface) = Interface::from_dbus_name(&iface_name) else {
                                continue;
                            };
                            table
                                .properties_changed(
                                    ObjectKey::from(path),
                                    interface,
                                    convert::properties(&changed),
                                )
                                .into_iter()
                                .collect()
                        }
                        Err(e) => {
                            warn!("Failed to parse PropertiesChanged signal args: {e}");
                            continue;
                        }
                    }
                }
            };

            for event in events {
                if let Err(e) = sender.send(event).await {
                    warn!("Service event receiver dropped: {e}");
                    return;
                }
            }
        }
        debug!("UDisks2 signal streams ended");
    });

    Ok(ServiceEventStream::new(receiver))
}
