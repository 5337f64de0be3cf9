//! Events and input descriptions.
//!
//! Two layers of events flow through a device:
//!
//! - [`RawEvent`] is what a hardware reader yields. Indices are local to the
//!   element kind (key `n`, encoder `n`), coordinates are strip pixels.
//! - [`InputEvent`] is what an [`Input`](crate::input::Input) emits to its
//!   listeners after the device has routed a raw event to it. Indices are
//!   positions in the device's input layout.
//!
//! ## Index conventions
//! Keys occupy layout indices `[0, key_count)`. The display strip, when the
//! device has one, sits at `key_count`. Encoders follow it. See
//! [`DeviceCapabilities`](crate::layout::DeviceCapabilities) for the helpers
//! that compute these boundaries.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Strip coordinate in pixels.
pub type Point = (u16, u16);

/// Tagged event produced by a device's raw event source.
///
/// The `key` / `encoder` fields are kind-local indices as reported by the
/// hardware, not layout indices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawEvent {
    ButtonPressed { key: u16 },
    ButtonReleased { key: u16 },
    EncoderPressed { encoder: u16 },
    EncoderReleased { encoder: u16 },

    /// Encoder rotation. Positive is clockwise.
    EncoderTwist { encoder: u16, delta: i8 },

    /// Short tap on the display strip.
    TouchPress { x: u16, y: u16 },

    /// Press-and-hold on the display strip.
    TouchLongPress { x: u16, y: u16 },

    /// Drag across the display strip.
    TouchSwipe { from: Point, to: Point },
}

/// Change emitted by an input to its listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// A button or encoder went down.
    Pressed,

    /// A button or encoder came back up.
    Released,

    /// An encoder rotated by `delta` detents.
    Twisted { delta: i8 },

    /// A display segment was touched at `position`, inside touch quadrant `quadrant`.
    TouchPressed { position: Point, quadrant: u8 },

    /// A touch on a display segment ended.
    TouchReleased { position: Point, quadrant: u8 },

    /// A drag across a display segment.
    Dragged { from: Point, to: Point },
}

impl InputKind {
    /// `Pressed` or `TouchPressed`.
    pub fn is_press(&self) -> bool {
        matches!(self, InputKind::Pressed | InputKind::TouchPressed { .. })
    }

    /// `Released` or `TouchReleased`.
    pub fn is_release(&self) -> bool {
        matches!(self, InputKind::Released | InputKind::TouchReleased { .. })
    }
}

/// Timestamped input change delivered to listeners.
#[derive(Clone, Debug)]
pub struct InputEvent {
    /// Capture time (monotonic).
    pub at: Instant,
    /// Layout index of the input that emitted the event.
    pub input: u16,
    /// The actual change.
    pub kind: InputKind,
}

impl InputEvent {
    pub fn now(input: u16, kind: InputKind) -> Self {
        Self {
            at: Instant::now(),
            input,
            kind,
        }
    }
}

/// Category of an input in a device layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputType {
    Button,
    ButtonWithoutDisplay,
    Encoder,
    DisplaySegment,
    ScreenlessComposite,
}

/// Describes one input of a device layout, for UIs and persistence.
///
/// Positions are grid cells: keys use their row/column, the strip spans the
/// full width below the keys, encoders sit in the row after that.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDesc {
    /// Layout index (matches [`InputEvent::input`]).
    pub index: u16,
    pub ty: InputType,
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    /// Pixel resolution of the input's display, if it has one.
    pub resolution: Option<(u32, u32)>,
}
