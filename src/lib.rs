//! # deckhand
//!
//! Hardware abstraction and rendering core for programmable control surfaces:
//! grids of display keys, rotary encoders and touch strips in the style of an
//! Elgato Stream Deck.
//!
//! - [`registry`] holds every plugin-contributed driver, renderer, action,
//!   trigger and socket request under a `plugin/name` key.
//! - [`device`] opens hardware through a [`Driver`], runs one reader thread
//!   per device and turns raw reports into per-input [`InputEvent`]s.
//! - [`input`] models buttons, encoders, strip segments and composites; the
//!   ones with a screen expose [`input::InputDisplay`].
//! - [`render`] resolves a screen item's renderer, caches by content hash and
//!   serializes concurrent renders of the same key.
//! - [`broadcast`] delivers device lifecycle notifications to all plugins and
//!   reports failures together once every handler has finished.
//! - [`dispatch`] runs the actions bound to a screen item's triggers.
//!
//! [`DeviceManager`] ties these together.

pub mod action;
pub mod backends;
pub mod broadcast;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod filtered_listener;
pub mod input;
pub mod layout;
pub mod logger;
pub mod manager;
pub mod metadata;
pub mod plugin;
pub mod registry;
pub mod render;
pub mod screen;
pub mod snapshot;
pub mod store;

pub use device::*;
pub use event::*;
pub use manager::*;

pub use broadcast::{LifecycleBroadcaster, Notification};
pub use config::CoreConfig;
pub use error::{
    ActionError, BroadcastError, ConfigError, DeviceError, ManagerError, PluginError,
    RegistryError, RenderError,
};
pub use input::{Input, InputDisplay, Resolution};
pub use layout::DeviceCapabilities;
pub use metadata::{DeviceIdentifier, DeviceMetadata, PartialIdentifier};
pub use plugin::{Plugin, PluginBuilder, PluginDefinition};
pub use registry::{NamespacedName, Registry};
pub use render::RenderPipeline;
pub use screen::ScreenItem;
