//! Device registration with the directory service
//!
//! The [`DeviceRegistry`] owns the only copy of the local
//! [`DeviceDescriptor`]. Everything else observes it through
//! [`DeviceRegistry::subscribe`] or [`DeviceRegistry::descriptor`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use url::Url;

use crate::error::{PhoneError, PhoneResult};

/// Identity and authorization presented to the backend
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// User identity as it appears in call participants (usually the email)
    pub user_id: String,
    /// Bearer token
    pub authorization: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            authorization: authorization.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("authorization", &"<redacted>")
            .finish()
    }
}

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Callback URL the realtime channel and signaling service address
    pub device_url: Option<Url>,
    pub user_id: String,
    pub registered_at: DateTime<Utc>,
}

/// External directory boundary
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn register(&self, credentials: &Credentials, device_name: &str) -> anyhow::Result<DeviceDescriptor>;

    async fn deregister(&self, descriptor: &DeviceDescriptor) -> anyhow::Result<()>;
}

pub struct DeviceRegistry {
    directory: Arc<dyn DirectoryService>,
    credentials: Credentials,
    device_name: String,
    descriptor: watch::Sender<Option<DeviceDescriptor>>,
    // Serializes register/deregister so concurrent callers share one exchange.
    op_lock: Mutex<()>,
}

impl DeviceRegistry {
    pub fn new(directory: Arc<dyn DirectoryService>, credentials: Credentials, device_name: impl Into<String>) -> Self {
        let (descriptor, _) = watch::channel(None);
        Self {
            directory,
            credentials,
            device_name: device_name.into(),
            descriptor,
            op_lock: Mutex::new(()),
        }
    }

    /// Register the device; resolves immediately when already registered.
    pub async fn register(&self) -> PhoneResult<DeviceDescriptor> {
        let _guard = self.op_lock.lock().await;

        let current = self.descriptor.borrow().clone();
        if let Some(existing) = current {
            tracing::debug!(user_id = %existing.user_id, "Device already registered, skipping exchange");
            return Ok(existing);
        }

        tracing::info!(user_id = %self.credentials.user_id, device_name = %self.device_name, "Registering device");

        let descriptor = self
            .directory
            .register(&self.credentials, &self.device_name)
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %self.credentials.user_id, error = %e, "Device registration failed");
                PhoneError::registration_failed(e.to_string())
            })?;

        tracing::info!(
            user_id = %descriptor.user_id,
            device_url = ?descriptor.device_url.as_ref().map(Url::as_str),
            "Device registered"
        );
        self.descriptor.send_replace(Some(descriptor.clone()));
        Ok(descriptor)
    }

    /// Clear the local descriptor, then tell the backend.
    ///
    /// A backend failure is logged and otherwise ignored: local state is
    /// already cleared.
    pub async fn deregister(&self) -> PhoneResult<()> {
        let _guard = self.op_lock.lock().await;

        let Some(descriptor) = self.descriptor.send_replace(None) else {
            tracing::debug!("Device not registered, deregister is a no-op");
            return Ok(());
        };

        if let Err(e) = self.directory.deregister(&descriptor).await {
            tracing::warn!(
                user_id = %descriptor.user_id,
                error = %e,
                "Backend deregistration failed; local registration already cleared"
            );
        } else {
            tracing::info!(user_id = %descriptor.user_id, "Device deregistered");
        }
        Ok(())
    }

    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.descriptor.borrow().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.descriptor.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceDescriptor>> {
        self.descriptor.subscribe()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("credentials", &self.credentials)
            .field("device_name", &self.device_name)
            .field("descriptor", &*self.descriptor.borrow())
            .finish()
    }
}
