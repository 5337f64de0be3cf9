//! Device identity.
//!
//! A [`DeviceIdentifier`] is namespaced by the driver that found the device,
//! so two drivers reporting the same serial never collide. Drivers only know
//! the local half ([`PartialIdentifier`]); the manager completes it with the
//! driver's registered name.
//!
//! # Persistence notes
//! - `identifier` is whatever the driver considers stable (a USB serial
//!   number for Stream Decks) and is what saved profiles should key on.
//! - `description` is user-facing and also used by drivers to recover the
//!   model when reconnecting.

use crate::layout::DeviceCapabilities;
use crate::registry::NamespacedName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique data that differentiates a device from any other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    /// Driver that found the device.
    pub driver: NamespacedName,
    /// Driver-local identifier, e.g. a serial number.
    pub identifier: String,
    /// Short description, e.g. `"Stream Deck Plus"`.
    pub description: String,
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.driver, self.identifier)
    }
}

/// Identifier as reported by a driver, before namespacing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialIdentifier {
    pub identifier: String,
    pub description: String,
}

impl PartialIdentifier {
    pub fn new(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
        }
    }

    /// Attach the registered driver name.
    pub fn complete(self, driver: NamespacedName) -> DeviceIdentifier {
        DeviceIdentifier {
            driver,
            identifier: self.identifier,
            description: self.description,
        }
    }
}

impl From<&DeviceIdentifier> for PartialIdentifier {
    fn from(id: &DeviceIdentifier) -> Self {
        Self {
            identifier: id.identifier.clone(),
            description: id.description.clone(),
        }
    }
}

/// Identity plus hardware capability description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub identifier: DeviceIdentifier,
    pub capabilities: DeviceCapabilities,
}
