// SPDX-License-Identifier: GPL-3.0-only

//! Encrypted volumes, their cleartext device and unlocking

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::block::BlockInfo;
use crate::error::DeviceError;
use crate::object::{Interface, ObjectKey, Properties, ServiceObject};
use crate::service::ServiceHandle;

pub(crate) const CLEARTEXT_DEVICE: &str = "CleartextDevice";

#[derive(Clone, Serialize)]
pub struct EncryptedRecord {
    #[serde(flatten)]
    pub block: BlockInfo,
    /// Decrypted block device backing this volume; `None` while locked.
    pub cleartext_device: Option<ObjectKey>,
    #[serde(skip)]
    service: ServiceHandle,
}

impl EncryptedRecord {
    pub fn from_object(object: &ServiceObject, service: ServiceHandle) -> Self {
        let cleartext_device = object
            .capability(Interface::Encrypted)
            .and_then(|enc| enc.get_reference(CLEARTEXT_DEVICE));

        Self {
            block: BlockInfo::from_object(object),
            cleartext_device,
            service,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.block.key
    }

    pub fn label(&self) -> &str {
        self.block.display_label()
    }

    pub fn is_locked(&self) -> bool {
        self.cleartext_device.is_none()
    }

    /// Apply a property change batch for this object.
    ///
    /// Returns true when the record changed and consumers should be told.
    pub fn apply_changes(&mut self, interface: Interface, changed: &Properties) -> bool {
        match interface {
            Interface::Encrypted if changed.contains(CLEARTEXT_DEVICE) => {
                let cleartext = changed.get_reference(CLEARTEXT_DEVICE);
                if cleartext == self.cleartext_device {
                    return false;
                }
                debug!(
                    "Cleartext device of {} changed: {:?} -> {:?}",
                    self.block.key, self.cleartext_device, cleartext
                );
                self.cleartext_device = cleartext;
                true
            }
            Interface::Block => self.block.apply_changes(changed),
            _ => false,
        }
    }

    /// Start unlocking with `passphrase`.
    ///
    /// The call is sent when the returned request is first polled; the request
    /// resolves to the outcome and never fails itself.
    pub fn unlock(&self, passphrase: impl Into<String>) -> UnlockRequest {
        info!("Unlocking {}", self.block.key);
        UnlockRequest {
            key: self.block.key.clone(),
            call: self
                .service
                .encrypted_unlock(self.block.key.clone(), passphrase.into()),
        }
    }
}

impl fmt::Debug for EncryptedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedRecord")
            .field("key", &self.block.key)
            .field("label", &self.block.label)
            .field("uuid", &self.block.uuid)
            .field("cleartext_device", &self.cleartext_device)
            .finish()
    }
}

/// How an unlock attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum UnlockOutcome {
    Finished { cleartext: ObjectKey },
    Failed { message: String },
}

/// An in-flight unlock of one encrypted volume.
pub struct UnlockRequest {
    key: ObjectKey,
    call: BoxFuture<'static, Result<ObjectKey, DeviceError>>,
}

impl UnlockRequest {
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }
}

impl Future for UnlockRequest {
    type Output = UnlockOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let key = self.key.clone();
        self.call.as_mut().poll(cx).map(|result| match result {
            Ok(cleartext) => {
                info!("Unlocked {key} as {cleartext}");
                UnlockOutcome::Finished { cleartext }
            }
            Err(e) => {
                warn!("Unlocking {key} failed: {e}");
                UnlockOutcome::Failed {
                    message: e.to_string(),
                }
            }
        })
    }
}
