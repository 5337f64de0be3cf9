//! Error taxonomy.
//!
//! Each concern gets its own enum so callers can tell a contract violation
//! (wrong payload type, duplicate registration) from a transient hardware
//! failure. Registry lookups never fail; a miss is `None`.

use thiserror::Error;

/// Failure while invoking a plugin action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The payload's runtime type does not match what the action expects.
    ///
    /// This is a configuration error and is never retried.
    #[error("action payload type mismatch: expected `{expected}`, got `{actual}`")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The action ran and reported a failure of its own.
    #[error("action failed: {0}")]
    Failed(String),
}

/// Hardware-side failure of a device, its reader or one of its displays.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device went away (unplugged, handle invalidated).
    #[error("device disconnected")]
    Disconnected,

    /// The device was disposed before the operation could run.
    #[error("device already disposed")]
    Disposed,

    /// Input index is out of range or has the wrong kind for the operation.
    #[error("input {0} does not exist on this device")]
    InvalidInput(u16),

    /// Input exists but has no display to upload to.
    #[error("input {0} has no display")]
    NoDisplay(u16),

    #[cfg(feature = "hid")]
    #[error("hid error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("i/o error: {0}")]
    Io(String),

    /// The driver does not recognize this device model.
    #[error("unsupported device: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Whether this error means the hardware is gone for good.
    ///
    /// hidapi reports unplugged devices through a generic error string, so it
    /// is matched by message.
    pub fn is_disconnect(&self) -> bool {
        match self {
            DeviceError::Disconnected | DeviceError::Disposed => true,
            #[cfg(feature = "hid")]
            DeviceError::Hid(hidapi::HidError::HidApiError { message }) => {
                message.contains("device disconnected") || message.contains("No such device")
            }
            _ => false,
        }
    }
}

/// Failure of a render request.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Upload or cache query failed on the target input.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The renderer could not produce an image from its settings.
    #[error("renderer failed: {0}")]
    Renderer(String),

    /// A blocking render/upload task was cancelled or panicked.
    #[error("render task failed: {0}")]
    Task(String),
}

/// Failure of one plugin's handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("configuration rejected: {0}")]
    Config(String),
}

/// Aggregate outcome of a lifecycle broadcast in which at least one plugin failed.
///
/// Produced only after every handler has run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{notification}: {} plugin(s) failed", failures.len())]
pub struct BroadcastError {
    /// Name of the notification that was broadcast, e.g. `device_connected`.
    pub notification: &'static str,
    /// `(plugin name, error)` for every handler that failed.
    pub failures: Vec<(String, PluginError)>,
}

/// Registry population errors. Only the load phase can produce these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate {kind} `{name}`")]
    Duplicate { kind: &'static str, name: String },

    #[error("duplicate plugin `{0}`")]
    DuplicatePlugin(String),

    #[error("a registry is already installed")]
    AlreadyInstalled,
}

/// Device manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no driver registered as `{0}`")]
    UnknownDriver(crate::registry::NamespacedName),

    #[error("no connected device `{0}`")]
    UnknownDevice(String),

    #[error("device `{0}` is already connected")]
    AlreadyConnected(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("plugin `{plugin}`: {source}")]
    Plugin { plugin: String, source: PluginError },
}

/// Loading or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}
