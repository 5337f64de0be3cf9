//! Hardware capability description and input layout derivation.
//!
//! A device's layout is derived purely from its [`DeviceCapabilities`]:
//!
//! | Layout indices | Input |
//! |---|---|
//! | `0 .. key_count` | keys (`Button` if keys have a display, else `ButtonWithoutDisplay`) |
//! | `key_count` | display strip, if present |
//! | after the strip (or after the keys) | encoders |

use crate::device::{DisplayTarget, DisplayWriter};
use crate::event::{InputDesc, InputType};
use crate::input::{
    Button, DisplaySegment, Encoder, Input, InputCore, PlainButton, Resolution,
    ScreenlessComposite, SlotDisplay,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// What a piece of hardware offers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub key_count: u16,
    pub rows: u16,
    pub columns: u16,
    pub encoder_count: u16,
    /// Pixel size of the embedded touch strip, if any.
    pub strip_size: Option<Resolution>,
    /// Per-key display resolution; `(0, 0)` when keys have no display.
    pub key_resolution: Resolution,
}

impl DeviceCapabilities {
    /// Whether keys carry their own displays.
    pub fn has_key_displays(&self) -> bool {
        self.key_resolution.0 > 0 && self.key_resolution.1 > 0
    }

    /// Layout index of the strip, if the device has one.
    pub fn strip_index(&self) -> Option<u16> {
        self.strip_size.map(|_| self.key_count)
    }

    /// Layout index of the first encoder.
    pub fn encoder_base(&self) -> u16 {
        self.key_count + u16::from(self.strip_size.is_some())
    }

    /// Layout index of encoder `encoder`, if it exists.
    pub fn encoder_index(&self, encoder: u16) -> Option<u16> {
        (encoder < self.encoder_count).then(|| self.encoder_base() + encoder)
    }

    /// Total number of inputs in the derived layout.
    pub fn input_count(&self) -> usize {
        usize::from(self.key_count)
            + usize::from(self.encoder_count)
            + usize::from(self.strip_size.is_some())
    }

    /// Grid position of key `key`. Devices that report no columns are laid out in one row.
    fn key_cell(&self, key: u16) -> (i32, i32) {
        let columns = self.columns.max(1);
        (i32::from(key % columns), i32::from(key / columns))
    }

    fn strip_row(&self) -> i32 {
        let columns = self.columns.max(1);
        i32::from(self.rows.max(self.key_count.div_ceil(columns)))
    }

    /// Layout description, without constructing any inputs.
    pub fn describe(&self) -> Vec<InputDesc> {
        let mut out = Vec::with_capacity(self.input_count());
        let key_ty = if self.has_key_displays() {
            InputType::Button
        } else {
            InputType::ButtonWithoutDisplay
        };
        for key in 0..self.key_count {
            let (x, y) = self.key_cell(key);
            out.push(InputDesc {
                index: key,
                ty: key_ty,
                x,
                y,
                w: 1,
                h: 1,
                resolution: self.has_key_displays().then_some(self.key_resolution),
            });
        }

        let mut row = self.strip_row();
        if let (Some(index), Some(size)) = (self.strip_index(), self.strip_size) {
            out.push(InputDesc {
                index,
                ty: InputType::DisplaySegment,
                x: 0,
                y: row,
                w: u32::from(self.columns.max(1)),
                h: 1,
                resolution: Some(size),
            });
            row += 1;
        }

        for encoder in 0..self.encoder_count {
            out.push(InputDesc {
                index: self.encoder_base() + encoder,
                ty: InputType::Encoder,
                x: i32::from(encoder),
                y: row,
                w: 1,
                h: 1,
                resolution: None,
            });
        }
        out
    }
}

/// Construct the inputs for `caps`.
///
/// `quadrants` is the touch split of the strip. `alive` is the owning
/// device's liveness flag; displays refuse uploads once it is cleared.
pub fn build_inputs(
    caps: &DeviceCapabilities,
    quadrants: u8,
    writer: &Arc<dyn DisplayWriter>,
    alive: &Arc<AtomicBool>,
) -> Vec<Input> {
    let mut inputs = Vec::with_capacity(caps.input_count());

    for key in 0..caps.key_count {
        let core = InputCore::new(key);
        if caps.has_key_displays() {
            let display = SlotDisplay::new(
                DisplayTarget::Key(key),
                caps.key_resolution,
                "key",
                writer.clone(),
                alive.clone(),
            );
            inputs.push(Input::Button(Button::new(core, display)));
        } else {
            inputs.push(Input::ButtonWithoutDisplay(PlainButton::new(core)));
        }
    }

    if let (Some(index), Some((width, height))) = (caps.strip_index(), caps.strip_size) {
        let display = SlotDisplay::new(
            DisplayTarget::Strip {
                x: 0,
                y: 0,
                width,
                height,
            },
            (width, height),
            "strip",
            writer.clone(),
            alive.clone(),
        );
        inputs.push(Input::DisplaySegment(DisplaySegment::new(
            InputCore::new(index),
            display,
            quadrants,
        )));
    }

    for encoder in 0..caps.encoder_count {
        inputs.push(Input::Encoder(Encoder::new(InputCore::new(
            caps.encoder_base() + encoder,
        ))));
    }

    inputs
}

/// Append a screenless composite over `members` to an existing layout.
///
/// Returns the composite's layout index.
pub fn push_composite(inputs: &mut Vec<Input>, members: Vec<u16>) -> u16 {
    let index = inputs.len() as u16;
    inputs.push(Input::ScreenlessComposite(ScreenlessComposite::new(
        InputCore::new(index),
        members,
    )));
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_surface::RecordingWriter;

    fn plus() -> DeviceCapabilities {
        DeviceCapabilities {
            key_count: 8,
            rows: 2,
            columns: 4,
            encoder_count: 4,
            strip_size: Some((800, 100)),
            key_resolution: (120, 120),
        }
    }

    fn build(caps: &DeviceCapabilities) -> Vec<Input> {
        let writer: Arc<dyn DisplayWriter> = Arc::new(RecordingWriter::default());
        build_inputs(caps, 4, &writer, &Arc::new(AtomicBool::new(true)))
    }

    #[test]
    fn test_layout_length_and_boundaries_with_strip() {
        let caps = plus();
        let inputs = build(&caps);
        assert_eq!(inputs.len(), caps.input_count());
        assert_eq!(inputs.len(), 8 + 4 + 1);

        for (i, input) in inputs.iter().enumerate() {
            assert_eq!(usize::from(input.index()), i);
        }
        assert!(inputs[..8].iter().all(|i| i.ty() == InputType::Button));
        assert_eq!(inputs[8].ty(), InputType::DisplaySegment);
        assert!(inputs[9..].iter().all(|i| i.ty() == InputType::Encoder));
        assert_eq!(caps.encoder_index(0), Some(9));
        assert_eq!(caps.encoder_index(4), None);
    }

    #[test]
    fn test_keys_without_resolution_have_no_display() {
        let caps = DeviceCapabilities {
            key_count: 3,
            rows: 1,
            columns: 3,
            ..Default::default()
        };
        let inputs = build(&caps);
        assert_eq!(inputs.len(), 3);
        assert!(inputs
            .iter()
            .all(|i| i.ty() == InputType::ButtonWithoutDisplay && i.display().is_none()));
    }

    #[test]
    fn test_layout_length_over_many_shapes() {
        for keys in [0u16, 1, 6, 15, 32] {
            for encoders in [0u16, 1, 4] {
                for strip in [None, Some((800, 100))] {
                    let caps = DeviceCapabilities {
                        key_count: keys,
                        rows: 4,
                        columns: 8,
                        encoder_count: encoders,
                        strip_size: strip,
                        key_resolution: (96, 96),
                    };
                    let inputs = build(&caps);
                    let expected = usize::from(keys)
                        + usize::from(encoders)
                        + usize::from(strip.is_some());
                    assert_eq!(inputs.len(), expected);
                    assert_eq!(caps.describe().len(), expected);
                    if strip.is_some() {
                        assert_eq!(inputs[usize::from(keys)].ty(), InputType::DisplaySegment);
                    }
                    for e in 0..encoders {
                        let idx = caps.encoder_index(e).unwrap();
                        assert_eq!(inputs[usize::from(idx)].ty(), InputType::Encoder);
                    }
                }
            }
        }
    }

    #[test]
    fn test_describe_positions() {
        let desc = plus().describe();
        assert_eq!((desc[5].x, desc[5].y), (1, 1));
        assert_eq!(desc[8].ty, InputType::DisplaySegment);
        assert_eq!((desc[8].y, desc[8].w), (2, 4));
        assert_eq!((desc[9].x, desc[9].y), (0, 3));
        assert_eq!(desc[0].resolution, Some((120, 120)));
        assert_eq!(desc[9].resolution, None);
    }

    #[test]
    fn test_composite_appends_after_layout() {
        let caps = DeviceCapabilities {
            key_count: 3,
            rows: 1,
            columns: 3,
            ..Default::default()
        };
        let mut inputs = build(&caps);
        let index = push_composite(&mut inputs, vec![0, 2]);
        assert_eq!(index, 3);
        match &inputs[3] {
            Input::ScreenlessComposite(c) => assert_eq!(c.members(), &[0, 2]),
            _ => panic!("expected composite"),
        }
    }
}
