//! Plugins.
//!
//! A plugin is an instance that receives device lifecycle notifications plus
//! a bundle of named items (drivers, renderers, actions, triggers, socket
//! requests). [`PluginBuilder`] collects both into a [`PluginDefinition`],
//! which [`RegistryBuilder::add_plugin`](crate::registry::RegistryBuilder::add_plugin)
//! namespaces under the plugin's name.

use crate::action::builtin::{PressTrigger, ReleaseTrigger, TwistTrigger};
use crate::action::{PluginAction, Trigger, Typed, TypedAction};
use crate::device::Driver;
use crate::error::PluginError;
use crate::metadata::DeviceIdentifier;
use crate::render::builtin::ButtonRenderer;
use crate::render::{ErasedRenderer, Renderer, TypedRenderer};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Name of the plugin that carries built-in triggers and renderers.
pub const CORE_PLUGIN: &str = "core";

/// Lifecycle handlers. Every handler defaults to doing nothing.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    async fn device_connected(&self, _device: &DeviceIdentifier) -> Result<(), PluginError> {
        Ok(())
    }

    async fn device_disconnected(&self, _device: &DeviceIdentifier) -> Result<(), PluginError> {
        Ok(())
    }

    /// A device became visible to its driver; it is not connected yet.
    async fn device_appeared(&self, _device: &DeviceIdentifier) -> Result<(), PluginError> {
        Ok(())
    }

    async fn device_disappeared(&self, _device: &DeviceIdentifier) -> Result<(), PluginError> {
        Ok(())
    }

    /// Configuration capability, if this plugin has persistent settings.
    fn configurable(self: Arc<Self>) -> Option<Arc<dyn Configurable>> {
        None
    }
}

/// Plugins with persistent settings.
pub trait Configurable: Send + Sync {
    fn export_config(&self) -> Value;

    fn import_config(&self, config: Value) -> Result<(), PluginError>;
}

/// Handler for a remote-control request addressed to a plugin.
#[async_trait]
pub trait SocketRequest: Send + Sync {
    async fn process(&self, request: Value) -> Result<Value, PluginError>;
}

/// A view of a plugin instance that only some plugins offer.
pub trait PluginCapability: 'static {
    fn from_plugin(plugin: &Arc<dyn Plugin>) -> Option<Arc<Self>>;
}

impl PluginCapability for dyn Plugin {
    fn from_plugin(plugin: &Arc<dyn Plugin>) -> Option<Arc<Self>> {
        Some(plugin.clone())
    }
}

impl PluginCapability for dyn Configurable {
    fn from_plugin(plugin: &Arc<dyn Plugin>) -> Option<Arc<Self>> {
        plugin.clone().configurable()
    }
}

/// A registered plugin.
#[derive(Clone)]
pub struct LoadedPlugin {
    pub name: String,
    pub instance: Arc<dyn Plugin>,
}

/// Plugin without lifecycle behavior, for plugins that only contribute items.
struct Inert;

impl Plugin for Inert {}

/// Everything one plugin contributes, with plugin-local item names.
pub struct PluginDefinition {
    pub(crate) name: String,
    pub(crate) instance: Arc<dyn Plugin>,
    pub(crate) drivers: Vec<(String, Arc<dyn Driver>)>,
    pub(crate) renderers: Vec<(String, Arc<dyn ErasedRenderer>)>,
    pub(crate) actions: Vec<(String, Arc<dyn PluginAction>)>,
    pub(crate) triggers: Vec<(String, Arc<dyn Trigger>)>,
    pub(crate) requests: Vec<(String, Arc<dyn SocketRequest>)>,
}

impl PluginDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct PluginBuilder {
    definition: PluginDefinition,
}

impl PluginBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: PluginDefinition {
                name: name.into(),
                instance: Arc::new(Inert),
                drivers: Vec::new(),
                renderers: Vec::new(),
                actions: Vec::new(),
                triggers: Vec::new(),
                requests: Vec::new(),
            },
        }
    }

    pub fn with_instance(self, instance: impl Plugin) -> Self {
        self.with_shared_instance(Arc::new(instance))
    }

    pub fn with_shared_instance(mut self, instance: Arc<dyn Plugin>) -> Self {
        self.definition.instance = instance;
        self
    }

    pub fn add_driver(mut self, name: &str, driver: impl Driver) -> Self {
        self.definition
            .drivers
            .push((name.to_string(), Arc::new(driver)));
        self
    }

    pub fn add_shared_driver(mut self, name: &str, driver: Arc<dyn Driver>) -> Self {
        self.definition.drivers.push((name.to_string(), driver));
        self
    }

    pub fn add_renderer<R: Renderer>(mut self, name: &str, renderer: R) -> Self {
        self.definition
            .renderers
            .push((name.to_string(), Arc::new(TypedRenderer(renderer))));
        self
    }

    pub fn add_erased_renderer(mut self, name: &str, renderer: impl ErasedRenderer + 'static) -> Self {
        self.definition
            .renderers
            .push((name.to_string(), Arc::new(renderer)));
        self
    }

    pub fn add_action<A: TypedAction>(mut self, name: &str, action: A) -> Self {
        self.definition
            .actions
            .push((name.to_string(), Arc::new(Typed(action))));
        self
    }

    pub fn add_untyped_action(mut self, name: &str, action: impl PluginAction + 'static) -> Self {
        self.definition
            .actions
            .push((name.to_string(), Arc::new(action)));
        self
    }

    pub fn add_trigger(mut self, name: &str, trigger: impl Trigger + 'static) -> Self {
        self.definition
            .triggers
            .push((name.to_string(), Arc::new(trigger)));
        self
    }

    pub fn add_socket_request(mut self, name: &str, request: impl SocketRequest + 'static) -> Self {
        self.definition
            .requests
            .push((name.to_string(), Arc::new(request)));
        self
    }

    pub fn build(self) -> PluginDefinition {
        self.definition
    }
}

/// Built-in triggers (`core/press`, `core/release`, `core/twist`) and the
/// button renderer (`core/button`).
pub fn core_plugin() -> PluginDefinition {
    PluginBuilder::new(CORE_PLUGIN)
        .add_trigger("press", PressTrigger)
        .add_trigger("release", ReleaseTrigger)
        .add_trigger("twist", TwistTrigger)
        .add_renderer("button", ButtonRenderer::default())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NamespacedName;

    struct Echo;

    #[async_trait]
    impl SocketRequest for Echo {
        async fn process(&self, request: Value) -> Result<Value, PluginError> {
            Ok(request)
        }
    }

    #[test]
    fn test_builder_collects_items() {
        let def = PluginBuilder::new("remote")
            .add_socket_request("echo", Echo)
            .add_trigger("press", PressTrigger)
            .build();
        assert_eq!(def.name(), "remote");
        assert_eq!(def.requests.len(), 1);
        assert_eq!(def.triggers[0].0, "press");
        assert!(def.instance.clone().configurable().is_none());
    }

    #[tokio::test]
    async fn test_inert_plugin_accepts_every_notification() {
        let def = core_plugin();
        let id = crate::metadata::PartialIdentifier::new("X", "Virtual")
            .complete(NamespacedName::new("core", "virtual"));
        assert!(def.instance.device_connected(&id).await.is_ok());
        assert!(def.instance.device_disappeared(&id).await.is_ok());
        assert_eq!(def.renderers.len(), 1);
        assert_eq!(def.triggers.len(), 3);
    }

    #[tokio::test]
    async fn test_socket_request_roundtrip() {
        let reply = Echo.process(serde_json::json!({"ping": 1})).await.unwrap();
        assert_eq!(reply["ping"], 1);
    }
}
