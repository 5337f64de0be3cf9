//! Device manager.
//!
//! Owns every connected [`Device`] and ties drivers, devices and plugins
//! together:
//! - enumerates devices across all registered drivers;
//! - diffs enumerations into appeared/disappeared notifications;
//! - connects and disconnects devices, notifying plugins;
//! - reaps devices whose reader observed a lost connection;
//! - loads and saves configuration of configurable plugins.
//!
//! Plugin handler failures during these operations are logged, never
//! propagated: a misbehaving plugin must not keep a device from connecting.

use crate::broadcast::{LifecycleBroadcaster, Notification};
use crate::config::CoreConfig;
use crate::device::{Device, Driver};
use crate::error::{DeviceError, ManagerError};
use crate::metadata::{DeviceIdentifier, PartialIdentifier};
use crate::plugin::Configurable;
use crate::registry::Registry;
use crate::store::ConfigStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Outcome of [`DeviceManager::refresh`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub appeared: Vec<DeviceIdentifier>,
    pub disappeared: Vec<DeviceIdentifier>,
}

pub struct DeviceManager {
    registry: Arc<Registry>,
    config: CoreConfig,
    runtime: Handle,
    broadcaster: LifecycleBroadcaster,
    known: Mutex<HashSet<DeviceIdentifier>>,
    devices: RwLock<HashMap<DeviceIdentifier, Arc<Device>>>,
}

impl DeviceManager {
    pub fn new(registry: Arc<Registry>, config: CoreConfig, runtime: Handle) -> Self {
        let broadcaster = LifecycleBroadcaster::new(registry.plugins().to_vec());
        Self {
            registry,
            config,
            runtime,
            broadcaster,
            known: Mutex::new(HashSet::new()),
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Attached devices across every registered driver. Blocks while drivers enumerate.
    pub fn list_devices(&self) -> Vec<DeviceIdentifier> {
        list_all(&self.registry)
    }

    /// Enumerate and notify plugins about devices that appeared or disappeared
    /// since the previous refresh.
    pub async fn refresh(&self) -> RefreshReport {
        let registry = self.registry.clone();
        let current: HashSet<DeviceIdentifier> =
            match tokio::task::spawn_blocking(move || list_all(&registry)).await {
                Ok(list) => list.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "device enumeration failed");
                    return RefreshReport::default();
                }
            };

        let mut report = RefreshReport::default();
        {
            let mut known = self.known.lock().await;
            report.appeared = current.difference(&known).cloned().collect();
            report.disappeared = known.difference(&current).cloned().collect();
            *known = current;
        }
        report.appeared.sort_by_key(|id| id.to_string());
        report.disappeared.sort_by_key(|id| id.to_string());

        for id in &report.appeared {
            info!(device = %id, description = %id.description, "device appeared");
            self.notify(Notification::DeviceAppeared, id).await;
        }
        for id in &report.disappeared {
            info!(device = %id, "device disappeared");
            self.notify(Notification::DeviceDisappeared, id).await;
        }
        report
    }

    /// Open `id` through its driver, start its reader and notify plugins.
    pub async fn connect(&self, id: &DeviceIdentifier) -> Result<Arc<Device>, ManagerError> {
        if self.devices.read().await.contains_key(id) {
            return Err(ManagerError::AlreadyConnected(id.to_string()));
        }
        let driver: Arc<dyn Driver> = self
            .registry
            .specific::<dyn Driver>(&id.driver)
            .ok_or_else(|| ManagerError::UnknownDriver(id.driver.clone()))?
            .instance
            .clone();

        let partial = PartialIdentifier::from(id);
        let connection = tokio::task::spawn_blocking(move || driver.connect(&partial))
            .await
            .map_err(|e| DeviceError::Io(e.to_string()))??;

        let device = Arc::new(Device::new(
            id.clone(),
            connection,
            &self.config,
            self.runtime.clone(),
        ));
        device.start()?;

        {
            let mut devices = self.devices.write().await;
            if devices.contains_key(id) {
                drop(devices);
                dispose_off_runtime(device).await;
                return Err(ManagerError::AlreadyConnected(id.to_string()));
            }
            devices.insert(id.clone(), device.clone());
        }
        info!(device = %id, inputs = device.inputs().len(), "device connected");
        self.notify(Notification::DeviceConnected, id).await;
        Ok(device)
    }

    /// Dispose `id` and notify plugins.
    pub async fn disconnect(&self, id: &DeviceIdentifier) -> Result<(), ManagerError> {
        let device = self
            .devices
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ManagerError::UnknownDevice(id.to_string()))?;
        dispose_off_runtime(device).await;
        info!(device = %id, "device disconnected");
        self.notify(Notification::DeviceDisconnected, id).await;
        Ok(())
    }

    pub async fn device(&self, id: &DeviceIdentifier) -> Option<Arc<Device>> {
        self.devices.read().await.get(id).cloned()
    }

    pub async fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Disconnect every device whose hardware went away. Returns their identifiers.
    pub async fn reap_lost(&self) -> Vec<DeviceIdentifier> {
        let lost: Vec<DeviceIdentifier> = self
            .devices
            .read()
            .await
            .iter()
            .filter(|(_, d)| d.is_lost())
            .map(|(id, _)| id.clone())
            .collect();
        let mut reaped = Vec::with_capacity(lost.len());
        for id in lost {
            warn!(device = %id, "reaping lost device");
            if self.disconnect(&id).await.is_ok() {
                reaped.push(id);
            }
        }
        reaped
    }

    /// Disconnect everything.
    pub async fn shutdown(&self) {
        let ids: Vec<DeviceIdentifier> = self.devices.read().await.keys().cloned().collect();
        for id in ids {
            // A concurrent disconnect may already have removed it.
            let _ = self.disconnect(&id).await;
        }
    }

    /// Feed saved configuration to every configurable plugin.
    ///
    /// Plugins with nothing saved are left alone. Returns how many plugins
    /// received a configuration.
    pub async fn load_plugin_configs(&self, store: &dyn ConfigStore) -> Result<usize, ManagerError> {
        let mut loaded = 0;
        for (plugin, configurable) in self.registry.plugins_assignable_to::<dyn Configurable>() {
            let Some(config) = store.load(plugin).await? else {
                continue;
            };
            configurable
                .import_config(config)
                .map_err(|source| ManagerError::Plugin {
                    plugin: plugin.to_string(),
                    source,
                })?;
            loaded += 1;
        }
        info!(plugins = loaded, "plugin configuration loaded");
        Ok(loaded)
    }

    /// Persist the configuration of every configurable plugin.
    pub async fn save_plugin_configs(&self, store: &dyn ConfigStore) -> Result<usize, ManagerError> {
        let mut saved = 0;
        for (plugin, configurable) in self.registry.plugins_assignable_to::<dyn Configurable>() {
            store.save(plugin, &configurable.export_config()).await?;
            saved += 1;
        }
        info!(plugins = saved, "plugin configuration saved");
        Ok(saved)
    }

    async fn notify(&self, notification: Notification, id: &DeviceIdentifier) {
        if let Err(e) = self.broadcaster.broadcast(notification, id).await {
            error!(device = %id, error = %e, "lifecycle broadcast had failures");
        }
    }
}

fn list_all(registry: &Registry) -> Vec<DeviceIdentifier> {
    registry
        .all::<dyn Driver>()
        .iter()
        .flat_map(|driver| {
            driver
                .instance
                .list_devices()
                .into_iter()
                .map(|partial| partial.complete(driver.name.clone()))
        })
        .collect()
}

/// Disposal joins the reader thread; keep that off the async workers.
async fn dispose_off_runtime(device: Arc<Device>) {
    let id = device.id().clone();
    if let Err(e) = tokio::task::spawn_blocking(move || device.dispose()).await {
        warn!(device = %id, error = %e, "dispose task failed");
    }
}
