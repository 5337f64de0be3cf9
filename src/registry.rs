//! Namespaced registry of everything plugins contribute.
//!
//! Items are addressed by [`NamespacedName`] (`plugin/item`). The registry
//! is populated once through [`RegistryBuilder`] while plugins load and is
//! read-only afterwards, so lookups need no locking. A lookup miss is
//! `None`: absence is an expected state, e.g. when checking whether a saved
//! reference still resolves.
//!
//! The process-wide instance is managed with [`install`], [`installed`] and
//! [`teardown`].

use crate::action::{PluginAction, Trigger};
use crate::device::Driver;
use crate::error::RegistryError;
use crate::plugin::{LoadedPlugin, PluginCapability, PluginDefinition, SocketRequest};
use crate::render::ErasedRenderer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::info;

/// `(plugin, item)` pair identifying a registered item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub plugin: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(plugin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin, self.name)
    }
}

/// A registered item together with its name.
pub struct Namespaced<T: ?Sized> {
    pub name: NamespacedName,
    pub instance: Arc<T>,
}

impl<T: ?Sized> Clone for Namespaced<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            instance: self.instance.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Namespaced<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Namespaced").field(&self.name).finish()
    }
}

/// Items of one kind, in registration order.
pub struct Collection<T: ?Sized> {
    items: Vec<Namespaced<T>>,
    index: HashMap<NamespacedName, usize>,
}

impl<T: ?Sized> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: ?Sized> Collection<T> {
    fn contains(&self, name: &NamespacedName) -> bool {
        self.index.contains_key(name)
    }

    fn insert(&mut self, name: NamespacedName, instance: Arc<T>) {
        self.index.insert(name.clone(), self.items.len());
        self.items.push(Namespaced { name, instance });
    }

    fn get(&self, name: &NamespacedName) -> Option<&Namespaced<T>> {
        self.index.get(name).map(|i| &self.items[*i])
    }
}

/// Kinds of items the registry holds.
pub trait Registrable: Send + Sync + 'static {
    /// Used in duplicate-registration errors.
    const KIND: &'static str;

    fn collection(registry: &Registry) -> &Collection<Self>;
    fn collection_mut(registry: &mut Registry) -> &mut Collection<Self>;
}

macro_rules! registrable {
    ($ty:ty, $field:ident, $kind:literal) => {
        impl Registrable for $ty {
            const KIND: &'static str = $kind;

            fn collection(registry: &Registry) -> &Collection<Self> {
                &registry.$field
            }

            fn collection_mut(registry: &mut Registry) -> &mut Collection<Self> {
                &mut registry.$field
            }
        }
    };
}

registrable!(dyn Driver, drivers, "driver");
registrable!(dyn ErasedRenderer, renderers, "renderer");
registrable!(dyn PluginAction, actions, "action");
registrable!(dyn Trigger, triggers, "trigger");
registrable!(dyn SocketRequest, requests, "socket request");

/// Read-only view over loaded plugins and their items.
#[derive(Default)]
pub struct Registry {
    plugins: Vec<LoadedPlugin>,
    plugin_index: HashMap<String, usize>,
    drivers: Collection<dyn Driver>,
    renderers: Collection<dyn ErasedRenderer>,
    actions: Collection<dyn PluginAction>,
    triggers: Collection<dyn Trigger>,
    requests: Collection<dyn SocketRequest>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Every registered `T`, in registration order.
    pub fn all<T: Registrable + ?Sized>(&self) -> &[Namespaced<T>] {
        &T::collection(self).items
    }

    /// Items of kind `T` contributed by `plugin`.
    pub fn by_plugin<T: Registrable + ?Sized>(&self, plugin: &str) -> Vec<&Namespaced<T>> {
        T::collection(self)
            .items
            .iter()
            .filter(|item| item.name.plugin == plugin)
            .collect()
    }

    pub fn specific<T: Registrable + ?Sized>(
        &self,
        name: &NamespacedName,
    ) -> Option<&Namespaced<T>> {
        T::collection(self).get(name)
    }

    /// [`Registry::specific`] with the name given in parts.
    pub fn specific_in<T: Registrable + ?Sized>(
        &self,
        plugin: &str,
        name: &str,
    ) -> Option<&Namespaced<T>> {
        self.specific(&NamespacedName::new(plugin, name))
    }

    /// Reverse lookup by instance identity.
    pub fn name_of<T: Registrable + ?Sized>(&self, instance: &Arc<T>) -> Option<&NamespacedName> {
        T::collection(self)
            .items
            .iter()
            .find(|item| std::ptr::addr_eq(Arc::as_ptr(&item.instance), Arc::as_ptr(instance)))
            .map(|item| &item.name)
    }

    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    pub fn plugin(&self, name: &str) -> Option<&LoadedPlugin> {
        self.plugin_index.get(name).map(|i| &self.plugins[*i])
    }

    /// Loaded plugins that offer capability `C`, with their names.
    pub fn plugins_assignable_to<C: PluginCapability + ?Sized>(&self) -> Vec<(&str, Arc<C>)> {
        self.plugins
            .iter()
            .filter_map(|p| C::from_plugin(&p.instance).map(|c| (p.name.as_str(), c)))
            .collect()
    }
}

/// Populates a [`Registry`] during plugin load.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    /// Register a plugin and all of its items.
    ///
    /// Either everything in `definition` is registered or nothing is.
    pub fn add_plugin(&mut self, definition: PluginDefinition) -> Result<(), RegistryError> {
        let PluginDefinition {
            name,
            instance,
            drivers,
            renderers,
            actions,
            triggers,
            requests,
        } = definition;

        if self.registry.plugin_index.contains_key(&name) {
            return Err(RegistryError::DuplicatePlugin(name));
        }
        self.check::<dyn Driver>(&name, &drivers)?;
        self.check::<dyn ErasedRenderer>(&name, &renderers)?;
        self.check::<dyn PluginAction>(&name, &actions)?;
        self.check::<dyn Trigger>(&name, &triggers)?;
        self.check::<dyn SocketRequest>(&name, &requests)?;

        self.insert(&name, drivers);
        self.insert(&name, renderers);
        self.insert(&name, actions);
        self.insert(&name, triggers);
        self.insert(&name, requests);

        info!(plugin = %name, "plugin registered");
        self.registry
            .plugin_index
            .insert(name.clone(), self.registry.plugins.len());
        self.registry.plugins.push(LoadedPlugin { name, instance });
        Ok(())
    }

    fn check<T: Registrable + ?Sized>(
        &self,
        plugin: &str,
        items: &[(String, Arc<T>)],
    ) -> Result<(), RegistryError> {
        let collection = T::collection(&self.registry);
        for (i, (item, _)) in items.iter().enumerate() {
            let name = NamespacedName::new(plugin, item.as_str());
            let repeated = items[..i].iter().any(|(other, _)| other == item);
            if repeated || collection.contains(&name) {
                return Err(RegistryError::Duplicate {
                    kind: T::KIND,
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn insert<T: Registrable + ?Sized>(&mut self, plugin: &str, items: Vec<(String, Arc<T>)>) {
        let collection = T::collection_mut(&mut self.registry);
        for (item, instance) in items {
            collection.insert(NamespacedName::new(plugin, item), instance);
        }
    }

    pub fn build(self) -> Registry {
        self.registry
    }
}

static INSTALLED: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

/// Make `registry` the process-wide registry. Fails if one is already installed.
pub fn install(registry: Registry) -> Result<Arc<Registry>, RegistryError> {
    let mut slot = INSTALLED.write().unwrap_or_else(|e| e.into_inner());
    if slot.is_some() {
        return Err(RegistryError::AlreadyInstalled);
    }
    let registry = Arc::new(registry);
    *slot = Some(registry.clone());
    Ok(registry)
}

/// The process-wide registry, if installed.
pub fn installed() -> Option<Arc<Registry>> {
    INSTALLED.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Remove the process-wide registry. Holders of an `Arc` keep their copy.
pub fn teardown() -> Option<Arc<Registry>> {
    INSTALLED.write().unwrap_or_else(|e| e.into_inner()).take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::builtin::PressTrigger;
    use crate::action::{ActionPayload, FnAction};
    use crate::error::PluginError;
    use crate::plugin::{core_plugin, Configurable, Plugin, PluginBuilder};
    use serde_json::{json, Value};

    fn noop_action() -> FnAction<impl Fn(&ActionPayload) -> Result<(), crate::error::ActionError>>
    {
        FnAction::new(|_: &ActionPayload| Ok(()))
    }

    fn sample() -> Registry {
        let mut builder = Registry::builder();
        builder.add_plugin(core_plugin()).unwrap();
        builder
            .add_plugin(
                PluginBuilder::new("os")
                    .add_untyped_action("hotkey", noop_action())
                    .add_untyped_action("launch", noop_action())
                    .build(),
            )
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_lookup_and_reverse_lookup() {
        let registry = sample();
        let found = registry
            .specific_in::<dyn PluginAction>("os", "launch")
            .unwrap();
        assert_eq!(found.name, NamespacedName::new("os", "launch"));
        assert_eq!(registry.name_of(&found.instance), Some(&found.name));

        assert_eq!(registry.all::<dyn PluginAction>().len(), 2);
        assert_eq!(registry.by_plugin::<dyn PluginAction>("os").len(), 2);
        assert_eq!(registry.by_plugin::<dyn Trigger>("core").len(), 3);
        assert!(registry
            .specific_in::<dyn ErasedRenderer>("core", "button")
            .is_some());
    }

    #[test]
    fn test_unknown_names_are_absent_not_errors() {
        let registry = sample();
        assert!(registry
            .specific_in::<dyn PluginAction>("os", "missing")
            .is_none());
        assert!(registry
            .specific_in::<dyn PluginAction>("nope", "launch")
            .is_none());
        assert!(registry.by_plugin::<dyn Driver>("nope").is_empty());
        assert!(registry.plugin("nope").is_none());

        let stray: Arc<dyn Trigger> = Arc::new(PressTrigger);
        assert!(registry.name_of(&stray).is_none());
    }

    #[test]
    fn test_duplicates_are_rejected_atomically() {
        let mut builder = Registry::builder();
        builder.add_plugin(core_plugin()).unwrap();
        assert_eq!(
            builder.add_plugin(core_plugin()).unwrap_err(),
            RegistryError::DuplicatePlugin("core".into())
        );

        let err = builder
            .add_plugin(
                PluginBuilder::new("os")
                    .add_untyped_action("hotkey", noop_action())
                    .add_trigger("tap", PressTrigger)
                    .add_untyped_action("hotkey", noop_action())
                    .build(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                kind: "action",
                name: "os/hotkey".into()
            }
        );

        let registry = builder.build();
        assert!(registry.plugin("os").is_none());
        assert!(registry.specific_in::<dyn Trigger>("os", "tap").is_none());
    }

    struct Settings;

    impl Plugin for Settings {
        fn configurable(self: Arc<Self>) -> Option<Arc<dyn Configurable>> {
            Some(self)
        }
    }

    impl Configurable for Settings {
        fn export_config(&self) -> Value {
            json!({})
        }

        fn import_config(&self, _config: Value) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn test_plugins_assignable_to_filters_by_capability() {
        let mut builder = Registry::builder();
        builder.add_plugin(core_plugin()).unwrap();
        builder
            .add_plugin(PluginBuilder::new("settings").with_instance(Settings).build())
            .unwrap();
        let registry = builder.build();

        let configurable = registry.plugins_assignable_to::<dyn Configurable>();
        assert_eq!(configurable.len(), 1);
        assert_eq!(configurable[0].0, "settings");
        assert_eq!(registry.plugins_assignable_to::<dyn Plugin>().len(), 2);
    }

    #[test]
    fn test_install_and_teardown() {
        teardown();
        let installed_registry = install(sample()).unwrap();
        assert!(matches!(
            install(Registry::default()),
            Err(RegistryError::AlreadyInstalled)
        ));
        assert!(Arc::ptr_eq(&installed().unwrap(), &installed_registry));
        assert!(teardown().is_some());
        assert!(installed().is_none());
    }
}
