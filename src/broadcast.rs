//! Plugin lifecycle broadcasts.
//!
//! Each notification is fanned out to every loaded plugin at once. A
//! broadcast returns only after every handler has finished. A failing or
//! panicking handler never keeps the others from running; failures are
//! collected and reported together at the end.

use crate::error::{BroadcastError, PluginError};
use crate::metadata::DeviceIdentifier;
use crate::plugin::{LoadedPlugin, Plugin};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Notification {
    DeviceConnected,
    DeviceDisconnected,
    DeviceAppeared,
    DeviceDisappeared,
}

impl Notification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Notification::DeviceConnected => "device_connected",
            Notification::DeviceDisconnected => "device_disconnected",
            Notification::DeviceAppeared => "device_appeared",
            Notification::DeviceDisappeared => "device_disappeared",
        }
    }

    async fn deliver(self, plugin: &dyn Plugin, device: &DeviceIdentifier) -> Result<(), PluginError> {
        match self {
            Notification::DeviceConnected => plugin.device_connected(device).await,
            Notification::DeviceDisconnected => plugin.device_disconnected(device).await,
            Notification::DeviceAppeared => plugin.device_appeared(device).await,
            Notification::DeviceDisappeared => plugin.device_disappeared(device).await,
        }
    }
}

/// Fans notifications out to a fixed set of plugins.
#[derive(Clone)]
pub struct LifecycleBroadcaster {
    plugins: Arc<[LoadedPlugin]>,
}

impl LifecycleBroadcaster {
    pub fn new(plugins: impl Into<Arc<[LoadedPlugin]>>) -> Self {
        Self {
            plugins: plugins.into(),
        }
    }

    /// Broadcast `notification` about `device` to every plugin.
    ///
    /// Handlers run concurrently on the tokio runtime.
    pub async fn broadcast(
        &self,
        notification: Notification,
        device: &DeviceIdentifier,
    ) -> Result<(), BroadcastError> {
        let handles: Vec<(String, JoinHandle<Result<(), PluginError>>)> = self
            .plugins
            .iter()
            .map(|plugin| {
                let instance = plugin.instance.clone();
                let device = device.clone();
                let handle = tokio::spawn(async move {
                    notification.deliver(instance.as_ref(), &device).await
                });
                (plugin.name.clone(), handle)
            })
            .collect();

        let mut failures = Vec::new();
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(PluginError::Panicked(e.to_string())),
                Err(e) => Err(PluginError::Failed(e.to_string())),
            };
            if let Err(e) = outcome {
                error!(plugin = %name, notification = notification.as_str(), %device, error = %e, "plugin handler failed");
                failures.push((name, e));
            }
        }

        debug!(
            notification = notification.as_str(),
            %device,
            plugins = self.plugins.len(),
            failed = failures.len(),
            "broadcast complete"
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BroadcastError {
                notification: notification.as_str(),
                failures,
            })
        }
    }

    pub async fn device_connected(&self, device: &DeviceIdentifier) -> Result<(), BroadcastError> {
        self.broadcast(Notification::DeviceConnected, device).await
    }

    pub async fn device_disconnected(&self, device: &DeviceIdentifier) -> Result<(), BroadcastError> {
        self.broadcast(Notification::DeviceDisconnected, device).await
    }

    pub async fn device_appeared(&self, device: &DeviceIdentifier) -> Result<(), BroadcastError> {
        self.broadcast(Notification::DeviceAppeared, device).await
    }

    pub async fn device_disappeared(&self, device: &DeviceIdentifier) -> Result<(), BroadcastError> {
        self.broadcast(Notification::DeviceDisappeared, device).await
    }
}
