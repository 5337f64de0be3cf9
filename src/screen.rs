//! Screen items: what is shown on, and triggered by, one input slot.
//!
//! A renderable item names a renderer and carries its settings blob. The
//! blob always matches the named renderer: switching renderers resets the
//! blob to the new renderer's defaults when the old one does not fit.

use crate::action::{ActionPayload, PluginAction};
use crate::registry::{NamespacedName, Registry};
use crate::render::{ErasedRenderer, RendererSettings};
use std::sync::Arc;

/// A trigger bound to an action with the data the action runs with.
#[derive(Clone, Debug)]
pub struct TriggerBinding {
    pub trigger: NamespacedName,
    pub action: NamespacedName,
    pub data: ActionPayload,
}

impl TriggerBinding {
    pub fn new(trigger: NamespacedName, action: NamespacedName, data: ActionPayload) -> Self {
        Self {
            trigger,
            action,
            data,
        }
    }

    /// Bind with the action's default data, for bindings with no saved
    /// configuration. `None` if the action is not registered.
    pub fn seeded(
        registry: &Registry,
        trigger: NamespacedName,
        action: NamespacedName,
    ) -> Option<Self> {
        let data = registry
            .specific::<dyn PluginAction>(&action)?
            .instance
            .default_data();
        Some(Self::new(trigger, action, data))
    }
}

#[derive(Clone, Debug, Default)]
pub struct RenderableItem {
    pub renderer: Option<NamespacedName>,
    pub settings: Option<RendererSettings>,
    pub triggers: Vec<TriggerBinding>,
}

#[derive(Clone, Debug, Default)]
pub struct ScreenlessItem {
    pub triggers: Vec<TriggerBinding>,
    /// Input the item is attached to, if any.
    pub input: Option<u16>,
}

#[derive(Clone, Debug)]
pub enum ScreenItem {
    Renderable(RenderableItem),
    Screenless(ScreenlessItem),
}

impl Default for ScreenItem {
    fn default() -> Self {
        ScreenItem::Renderable(RenderableItem::default())
    }
}

impl ScreenItem {
    pub fn triggers(&self) -> &[TriggerBinding] {
        match self {
            ScreenItem::Renderable(item) => &item.triggers,
            ScreenItem::Screenless(item) => &item.triggers,
        }
    }

    pub fn triggers_mut(&mut self) -> &mut Vec<TriggerBinding> {
        match self {
            ScreenItem::Renderable(item) => &mut item.triggers,
            ScreenItem::Screenless(item) => &mut item.triggers,
        }
    }

    pub fn renderer(&self) -> Option<&NamespacedName> {
        match self {
            ScreenItem::Renderable(item) => item.renderer.as_ref(),
            ScreenItem::Screenless(_) => None,
        }
    }

    pub fn settings(&self) -> Option<&RendererSettings> {
        match self {
            ScreenItem::Renderable(item) => item.settings.as_ref(),
            ScreenItem::Screenless(_) => None,
        }
    }
}

impl RenderableItem {
    /// Point the item at `name`. Settings the new renderer cannot read are
    /// replaced by its defaults.
    ///
    /// Returns `false` (leaving the item untouched) if `name` is not registered.
    pub fn set_renderer(&mut self, registry: &Registry, name: NamespacedName) -> bool {
        let Some(renderer) = registry.specific::<dyn ErasedRenderer>(&name) else {
            return false;
        };
        let renderer = renderer.instance.clone();
        self.renderer = Some(name);
        self.normalize_with(renderer.as_ref());
        true
    }

    /// Make the settings blob match `renderer`.
    ///
    /// Returns `true` if the blob was reset to defaults.
    pub fn normalize_with(&mut self, renderer: &dyn ErasedRenderer) -> bool {
        match &self.settings {
            Some(settings) if renderer.accepts(settings) => false,
            _ => {
                self.settings = Some(renderer.default_settings());
                true
            }
        }
    }

    /// Resolve the named renderer and normalize against it.
    pub fn resolve(&mut self, registry: &Registry) -> Option<Arc<dyn ErasedRenderer>> {
        let renderer = registry
            .specific::<dyn ErasedRenderer>(self.renderer.as_ref()?)?
            .instance
            .clone();
        self.normalize_with(renderer.as_ref());
        Some(renderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Typed, TypedAction};
    use crate::error::{ActionError, RenderError};
    use crate::input::Resolution;
    use crate::plugin::{core_plugin, PluginBuilder};
    use crate::render::builtin::ButtonSettings;
    use crate::render::Renderer;
    use image::DynamicImage;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Caption {
        text: String,
        size: u32,
    }

    impl Default for Caption {
        fn default() -> Self {
            Self {
                text: "label".into(),
                size: 14,
            }
        }
    }

    struct CaptionRenderer;

    impl Renderer for CaptionRenderer {
        type Settings = Caption;

        fn render(&self, _: &Caption, (w, h): Resolution) -> Result<DynamicImage, RenderError> {
            Ok(DynamicImage::new_rgba8(w, h))
        }
    }

    struct Volume;

    impl TypedAction for Volume {
        type Data = u8;

        fn run(&self, _: &u8) -> Result<(), ActionError> {
            Ok(())
        }

        fn default_data(&self) -> u8 {
            50
        }
    }

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder.add_plugin(core_plugin()).unwrap();
        builder
            .add_plugin(
                PluginBuilder::new("text")
                    .add_renderer("caption", CaptionRenderer)
                    .add_action("volume", Volume)
                    .build(),
            )
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_incompatible_renderer_resets_settings_to_default() {
        let registry = registry();
        let mut item = RenderableItem::default();
        assert!(item.set_renderer(&registry, NamespacedName::new("core", "button")));

        let red = ButtonSettings::solid([255, 0, 0, 255]);
        item.settings = Some(RendererSettings::of(&red).unwrap());

        assert!(item.set_renderer(&registry, NamespacedName::new("text", "caption")));
        let settings = item.settings.as_ref().unwrap();
        assert_eq!(settings.decode::<Caption>(), Some(Caption::default()));
        assert!(settings.decode::<ButtonSettings>().is_none());
    }

    #[test]
    fn test_compatible_settings_are_kept() {
        let registry = registry();
        let red = ButtonSettings::solid([255, 0, 0, 255]);
        let mut item = RenderableItem {
            settings: Some(RendererSettings::of(&red).unwrap()),
            ..Default::default()
        };
        assert!(item.set_renderer(&registry, NamespacedName::new("core", "button")));
        assert_eq!(
            item.settings.unwrap().decode::<ButtonSettings>(),
            Some(red)
        );
    }

    #[test]
    fn test_unknown_renderer_leaves_item_untouched() {
        let registry = registry();
        let mut item = RenderableItem::default();
        assert!(!item.set_renderer(&registry, NamespacedName::new("text", "gone")));
        assert!(item.renderer.is_none());
        assert!(item.settings.is_none());
        assert!(item.resolve(&registry).is_none());
    }

    #[test]
    fn test_seeded_binding_uses_action_default() {
        let registry = registry();
        let binding = TriggerBinding::seeded(
            &registry,
            NamespacedName::new("core", "press"),
            NamespacedName::new("text", "volume"),
        )
        .unwrap();
        assert_eq!(binding.data.downcast_ref::<u8>(), Some(&50));
        assert!(Typed(Volume).invoke(&binding.data).is_ok());

        assert!(TriggerBinding::seeded(
            &registry,
            NamespacedName::new("core", "press"),
            NamespacedName::new("text", "missing"),
        )
        .is_none());
    }
}
