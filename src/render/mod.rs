//! Renderers and render cache keys.
//!
//! A [`Renderer`] is typed over its settings. The registry stores renderers
//! behind [`ErasedRenderer`], which works on a [`RendererSettings`] blob
//! (settings type name plus JSON value) and is resolved once, when the
//! plugin registers it.

pub mod builtin;
pub mod pipeline;
pub mod text;

pub use pipeline::{KeyLocks, RenderOutcome, RenderPipeline};

use crate::error::RenderError;
use crate::input::Resolution;
use crate::registry::NamespacedName;
use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Produces pixels from typed settings.
pub trait Renderer: Send + Sync + 'static {
    type Settings: Serialize + DeserializeOwned + Default + Send + Sync + 'static;

    fn render(
        &self,
        settings: &Self::Settings,
        resolution: Resolution,
    ) -> Result<DynamicImage, RenderError>;

    /// Whether output for `settings` may be served from a display cache.
    fn cacheable(&self, _settings: &Self::Settings) -> bool {
        true
    }
}

/// Settings blob carried by a screen item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RendererSettings {
    /// Rust type name of the settings the blob was produced from.
    pub type_name: String,
    pub value: serde_json::Value,
}

impl RendererSettings {
    pub fn of<T: Serialize>(settings: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            type_name: any::type_name::<T>().to_string(),
            value: serde_json::to_value(settings)?,
        })
    }

    /// Decode into `T`, if the blob was produced from a `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        if self.type_name != any::type_name::<T>() {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// Renderer as stored in the registry.
pub trait ErasedRenderer: Send + Sync {
    fn settings_type(&self) -> &'static str;

    fn default_settings(&self) -> RendererSettings;

    /// Whether `settings` is a well-formed blob of this renderer's settings type.
    fn accepts(&self, settings: &RendererSettings) -> bool;

    fn render_erased(
        &self,
        settings: &RendererSettings,
        resolution: Resolution,
    ) -> Result<DynamicImage, RenderError>;

    /// Blobs this renderer cannot read count as cacheable.
    fn cacheable_erased(&self, settings: &RendererSettings) -> bool;
}

/// Adapter exposing a [`Renderer`] as an [`ErasedRenderer`].
pub struct TypedRenderer<R>(pub R);

impl<R: Renderer> TypedRenderer<R> {
    /// Typed access, bypassing the settings blob.
    pub fn inner(&self) -> &R {
        &self.0
    }
}

impl<R: Renderer> ErasedRenderer for TypedRenderer<R> {
    fn settings_type(&self) -> &'static str {
        any::type_name::<R::Settings>()
    }

    fn default_settings(&self) -> RendererSettings {
        let defaults = R::Settings::default();
        RendererSettings {
            type_name: self.settings_type().to_string(),
            value: serde_json::to_value(&defaults).unwrap_or(serde_json::Value::Null),
        }
    }

    fn accepts(&self, settings: &RendererSettings) -> bool {
        settings.decode::<R::Settings>().is_some()
    }

    fn render_erased(
        &self,
        settings: &RendererSettings,
        resolution: Resolution,
    ) -> Result<DynamicImage, RenderError> {
        let typed = settings.decode::<R::Settings>().ok_or_else(|| {
            RenderError::Renderer(format!(
                "expected `{}` settings, got `{}`",
                self.settings_type(),
                settings.type_name
            ))
        })?;
        self.0.render(&typed, resolution)
    }

    fn cacheable_erased(&self, settings: &RendererSettings) -> bool {
        settings
            .decode::<R::Settings>()
            .map_or(true, |typed| self.0.cacheable(&typed))
    }
}

/// Logical cache key of a render, before per-display salting.
///
/// Hashes the renderer identity, the settings value and the input it is
/// shown on. JSON object keys are ordered, so equal settings always produce
/// equal text.
pub fn base_cache_key(
    renderer: &NamespacedName,
    settings: &RendererSettings,
    input: Option<u16>,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    renderer.hash(&mut hasher);
    settings.type_name.hash(&mut hasher);
    settings.value.to_string().hash(&mut hasher);
    input.hash(&mut hasher);
    hasher.finish()
}
