//! Text layers drawn over a button background.
//!
//! Fonts are loaded once into a [`FontCollection`] and referenced by name
//! from settings, so settings stay small and serializable.

use crate::error::RenderError;
use fontdue::{Font, FontSettings};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Anchor of a text block inside the slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextAlignment {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Edge {
    Start,
    Middle,
    End,
}

impl TextAlignment {
    /// `(horizontal, vertical)`.
    fn edges(self) -> (Edge, Edge) {
        use Edge::*;
        match self {
            TextAlignment::TopLeft => (Start, Start),
            TextAlignment::Top => (Middle, Start),
            TextAlignment::TopRight => (End, Start),
            TextAlignment::Left => (Start, Middle),
            TextAlignment::Center => (Middle, Middle),
            TextAlignment::Right => (End, Middle),
            TextAlignment::BottomLeft => (Start, End),
            TextAlignment::Bottom => (Middle, End),
            TextAlignment::BottomRight => (End, End),
        }
    }
}

/// Copy of the text drawn underneath it, shifted by `offset`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextShadow {
    pub offset: (i32, i32),
    pub color: [u8; 4],
}

/// One block of text. Lines are separated by `\n`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextLayer {
    pub text: String,
    /// Name of a font in the renderer's [`FontCollection`].
    pub font: String,
    /// Pixel height of one em.
    pub size: f32,
    pub alignment: TextAlignment,
    /// Distance kept from the slot edges the block is aligned to.
    pub padding: u32,
    /// Extra shift applied after alignment.
    pub offset: (f32, f32),
    pub color: [u8; 4],
    pub shadow: Option<TextShadow>,
}

impl Default for TextLayer {
    fn default() -> Self {
        Self {
            text: String::new(),
            font: String::new(),
            size: 16.0,
            alignment: TextAlignment::Center,
            padding: 0,
            offset: (0.0, 0.0),
            color: [255, 255, 255, 255],
            shadow: None,
        }
    }
}

/// Named fonts shared between renderers.
#[derive(Clone, Default)]
pub struct FontCollection {
    fonts: Arc<RwLock<HashMap<String, Arc<Font>>>>,
}

impl fmt::Debug for FontCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FontCollection {
    /// Parse a TrueType/OpenType font and register it under `name`,
    /// replacing any font of the same name.
    pub fn load(&self, name: impl Into<String>, data: &[u8]) -> Result<(), RenderError> {
        let name = name.into();
        let font = Font::from_bytes(data, FontSettings::default())
            .map_err(|e| RenderError::Renderer(format!("font `{name}`: {e}")))?;
        self.fonts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, Arc::new(font));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Font>> {
        self.fonts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.fonts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fonts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Draw `layer` onto `canvas`, shadow first.
pub fn draw_layer(canvas: &mut RgbaImage, font: &Font, layer: &TextLayer) {
    if let Some(shadow) = &layer.shadow {
        draw_block(canvas, font, layer, shadow.offset, shadow.color);
    }
    draw_block(canvas, font, layer, (0, 0), layer.color);
}

/// Pen advance of one line.
pub fn measure_line(font: &Font, line: &str, size: f32) -> f32 {
    line.chars()
        .map(|c| font.metrics(c, size).advance_width)
        .sum()
}

fn align(edge: Edge, extent: f32, content: f32, padding: f32) -> f32 {
    match edge {
        Edge::Start => padding,
        Edge::Middle => (extent - content) / 2.0,
        Edge::End => extent - content - padding,
    }
}

fn draw_block(
    canvas: &mut RgbaImage,
    font: &Font,
    layer: &TextLayer,
    shift: (i32, i32),
    color: [u8; 4],
) {
    let size = layer.size;
    let (ascent, line_height) = font
        .horizontal_line_metrics(size)
        .map_or((size, size), |m| (m.ascent, m.new_line_size));
    let lines: Vec<&str> = layer.text.lines().collect();
    let (width, height) = (canvas.width() as f32, canvas.height() as f32);
    let padding = layer.padding as f32;
    let (horizontal, vertical) = layer.alignment.edges();

    let block = line_height * lines.len() as f32;
    let top = align(vertical, height, block, padding) + layer.offset.1 + shift.1 as f32;

    for (i, line) in lines.iter().enumerate() {
        let line_width = measure_line(font, line, size);
        let mut pen =
            align(horizontal, width, line_width, padding) + layer.offset.0 + shift.0 as f32;
        let baseline = (top + ascent + line_height * i as f32).round() as i32;
        for c in line.chars() {
            let (metrics, coverage) = font.rasterize(c, size);
            let gx = pen.round() as i32 + metrics.xmin;
            let gy = baseline - metrics.height as i32 - metrics.ymin;
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let alpha = coverage[row * metrics.width + col];
                    let (px, py) = (gx + col as i32, gy + row as i32);
                    if alpha == 0
                        || px < 0
                        || py < 0
                        || px >= canvas.width() as i32
                        || py >= canvas.height() as i32
                    {
                        continue;
                    }
                    blend(&mut canvas.get_pixel_mut(px as u32, py as u32).0, color, alpha);
                }
            }
            pen += metrics.advance_width;
        }
    }
}

/// Source-over blend of `color` at glyph `coverage`.
fn blend(dst: &mut [u8; 4], color: [u8; 4], coverage: u8) {
    let a = u32::from(coverage) * u32::from(color[3]) / 255;
    for i in 0..3 {
        let mixed = (u32::from(color[i]) * a + u32::from(dst[i]) * (255 - a)) / 255;
        dst[i] = mixed as u8;
    }
    dst[3] = dst[3].max(a as u8);
}
