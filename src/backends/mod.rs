//! Device backends for `deckhand`.
//!
//! Each backend implements [`Driver`](crate::device::Driver) and hands out a
//! [`RawEventSource`](crate::device::RawEventSource) plus a
//! [`DisplayWriter`](crate::device::DisplayWriter) per opened device.
//!
//! # Feature flags
//! - **`hid`**: enables the Elgato Stream Deck backend over `hidapi` (default).
//!
//! The virtual surface is always available; tests and demos drive it directly.

pub mod virtual_surface;

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;
