//! Point-in-time view of a device's input state.
//!
//! [`Snapshot`] is an **owned**, read-only copy of what the reader thread has
//! derived so far: which buttons and encoders are held, how far each encoder
//! has been turned, and where the strip was last touched. It is produced by
//! [`Device::snapshot`](crate::device::Device::snapshot) and is cheap to clone.
//!
//! # Semantics
//! - Keys are layout indices (same as [`InputEvent::input`](crate::event::InputEvent::input)).
//! - The reader thread writes the underlying state, except for long-press
//!   releases, which a runtime task writes once the hold time has passed.
//!   A snapshot never changes after it is taken.
//! - Display segments are never reported as `pressed`. They record their last
//!   touch point and whether a touch is still in progress.

use crate::event::{InputKind, Point};
use std::collections::HashMap;

/// Derived state of one input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputState {
    pub pressed: bool,
    /// Sum of all twist deltas since the device started.
    pub twist: i64,
    pub last_touch: Option<Point>,
    /// Between a touch press and its release (taps release immediately).
    pub touching: bool,
}

/// Owned snapshot of input states (`layout index → InputState`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot(pub HashMap<u16, InputState>);

impl Snapshot {
    /// Get the state of a specific input. Inputs that never saw an event are absent.
    #[inline]
    pub fn get(&self, input: u16) -> Option<&InputState> {
        self.0.get(&input)
    }

    /// Whether `input` is currently held.
    #[inline]
    pub fn is_pressed(&self, input: u16) -> bool {
        self.get(input).is_some_and(|s| s.pressed)
    }

    /// Iterate `(input, state)` pairs.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&u16, &InputState)> {
        self.0.iter()
    }

    /// Consume the snapshot and return the inner map.
    #[inline]
    pub fn into_inner(self) -> HashMap<u16, InputState> {
        self.0
    }

    /// Fold one emitted change into the state map.
    pub(crate) fn apply(&mut self, input: u16, kind: &InputKind) {
        let state = self.0.entry(input).or_default();
        match kind {
            InputKind::Pressed => state.pressed = true,
            InputKind::Released => state.pressed = false,
            InputKind::Twisted { delta } => state.twist += i64::from(*delta),
            InputKind::TouchPressed { position, .. } => {
                state.last_touch = Some(*position);
                state.touching = true;
            }
            InputKind::TouchReleased { position, .. } => {
                state.last_touch = Some(*position);
                state.touching = false;
            }
            InputKind::Dragged { to, .. } => state.last_touch = Some(*to),
        }
    }
}
