//! Button renderer: a background with optional text layers on top.

use super::text::{draw_layer, FontCollection, TextLayer};
use super::Renderer;
use crate::error::RenderError;
use crate::input::Resolution;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// What fills the slot before text is drawn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Background {
    Solid([u8; 4]),
    /// Left to right.
    HorizontalGradient([u8; 4], [u8; 4]),
    /// Top to bottom.
    VerticalGradient([u8; 4], [u8; 4]),
    /// Base64-encoded image file in any format `image` recognizes.
    NewImage(String),
    /// Image registered in the renderer's [`ImageCollection`].
    ExistingImage(String),
}

impl Default for Background {
    fn default() -> Self {
        Background::Solid([255, 255, 255, 255])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonSettings {
    pub background: Background,
    /// Drawn in order, later layers on top.
    pub text: Vec<TextLayer>,
    /// `false` re-renders on every request. Needed when a named image or
    /// font changes without the settings changing.
    pub to_cache: bool,
}

impl Default for ButtonSettings {
    fn default() -> Self {
        Self {
            background: Background::default(),
            text: Vec::new(),
            to_cache: true,
        }
    }
}

impl ButtonSettings {
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            background: Background::Solid(color),
            ..Default::default()
        }
    }
}

/// Named images shared between renderers.
#[derive(Clone, Default)]
pub struct ImageCollection {
    images: Arc<RwLock<HashMap<String, DynamicImage>>>,
}

impl fmt::Debug for ImageCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let images = self.images.read().unwrap_or_else(|e| e.into_inner());
        f.debug_list().entries(images.keys()).finish()
    }
}

impl ImageCollection {
    pub fn insert(&self, name: impl Into<String>, image: DynamicImage) {
        self.images
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), image);
    }

    pub fn get(&self, name: &str) -> Option<DynamicImage> {
        self.images
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.images
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }
}

/// Decode a base64 image blob.
pub fn decode_blob(blob: &str) -> Result<DynamicImage, RenderError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(blob.trim())
        .map_err(|e| RenderError::Renderer(format!("invalid base64 image: {e}")))?;
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| RenderError::Renderer(format!("unreadable image: {e}")))?
        .decode()
        .map_err(|e| RenderError::Renderer(format!("undecodable image: {e}")))
}

fn lerp(a: [u8; 4], b: [u8; 4], t: f32) -> Rgba<u8> {
    let mut out = [0u8; 4];
    for i in 0..4 {
        let v = f32::from(a[i]) + (f32::from(b[i]) - f32::from(a[i])) * t;
        out[i] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

fn position(p: u32, extent: u32) -> f32 {
    if extent <= 1 {
        0.0
    } else {
        p as f32 / (extent - 1) as f32
    }
}

/// Magenta/black checkerboard shown where an image could not be resolved.
pub fn missing_image(width: u32, height: u32) -> RgbaImage {
    let cell = (width.max(height) / 4).max(1);
    RgbaImage::from_fn(width, height, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgba([255, 0, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

/// Renders [`ButtonSettings`]: background, then text layers.
#[derive(Clone, Debug, Default)]
pub struct ButtonRenderer {
    images: ImageCollection,
    fonts: FontCollection,
}

impl ButtonRenderer {
    pub fn new(images: ImageCollection, fonts: FontCollection) -> Self {
        Self { images, fonts }
    }

    pub fn images(&self) -> &ImageCollection {
        &self.images
    }

    pub fn fonts(&self) -> &FontCollection {
        &self.fonts
    }

    fn background(&self, background: &Background, width: u32, height: u32) -> RgbaImage {
        let fitted = |img: DynamicImage| {
            img.resize_to_fill(width, height, FilterType::Triangle)
                .to_rgba8()
        };
        match background {
            Background::Solid(c) => RgbaImage::from_pixel(width, height, Rgba(*c)),
            Background::HorizontalGradient(from, to) => {
                RgbaImage::from_fn(width, height, |x, _| lerp(*from, *to, position(x, width)))
            }
            Background::VerticalGradient(from, to) => {
                RgbaImage::from_fn(width, height, |_, y| lerp(*from, *to, position(y, height)))
            }
            Background::NewImage(blob) => match decode_blob(blob) {
                Ok(img) => fitted(img),
                Err(e) => {
                    warn!(error = %e, "image background unusable");
                    missing_image(width, height)
                }
            },
            Background::ExistingImage(name) => match self.images.get(name) {
                Some(img) => fitted(img),
                None => {
                    warn!(image = %name, "image not in collection");
                    missing_image(width, height)
                }
            },
        }
    }
}

impl Renderer for ButtonRenderer {
    type Settings = ButtonSettings;

    fn render(
        &self,
        settings: &ButtonSettings,
        (width, height): Resolution,
    ) -> Result<DynamicImage, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Renderer(format!(
                "cannot render into {width}x{height}"
            )));
        }
        let mut canvas = self.background(&settings.background, width, height);
        for layer in &settings.text {
            match self.fonts.get(&layer.font) {
                Some(font) => draw_layer(&mut canvas, &font, layer),
                None => warn!(font = %layer.font, "font not loaded, text skipped"),
            }
        }
        Ok(DynamicImage::ImageRgba8(canvas))
    }

    fn cacheable(&self, settings: &ButtonSettings) -> bool {
        settings.to_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::text::tests::system_fonts;
    use image::codecs::bmp::BmpEncoder;
    use image::ExtendedColorType;

    fn close(a: [u8; 4], b: [u8; 4]) -> bool {
        a.iter().zip(b).all(|(x, y)| x.abs_diff(y) <= 2)
    }

    fn render(renderer: &ButtonRenderer, settings: ButtonSettings, size: Resolution) -> RgbaImage {
        renderer.render(&settings, size).unwrap().to_rgba8()
    }

    fn bmp_blob(color: [u8; 3], size: u32) -> String {
        let pixels: Vec<u8> = (0..size * size).flat_map(|_| color).collect();
        let mut out = Vec::new();
        BmpEncoder::new(&mut out)
            .encode(&pixels, size, size, ExtendedColorType::Rgb8)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(out)
    }

    #[test]
    fn test_default_is_white() {
        let img = render(&ButtonRenderer::default(), ButtonSettings::default(), (4, 4));
        assert_eq!(img.get_pixel(3, 3).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_gradients_run_edge_to_edge() {
        let r = ButtonRenderer::default();
        let black = [0, 0, 0, 255];
        let white = [255, 255, 255, 255];
        let h = render(
            &r,
            ButtonSettings {
                background: Background::HorizontalGradient(black, white),
                ..Default::default()
            },
            (5, 2),
        );
        assert_eq!(h.get_pixel(0, 1).0, black);
        assert_eq!(h.get_pixel(4, 0).0, white);

        let v = render(
            &r,
            ButtonSettings {
                background: Background::VerticalGradient(black, white),
                ..Default::default()
            },
            (2, 3),
        );
        assert_eq!(v.get_pixel(1, 0).0, black);
        assert_eq!(v.get_pixel(1, 1).0, [128, 128, 128, 255]);
        assert_eq!(v.get_pixel(0, 2).0, white);
    }

    #[test]
    fn test_zero_size_is_an_error() {
        assert!(ButtonRenderer::default()
            .render(&ButtonSettings::default(), (0, 10))
            .is_err());
    }

    #[test]
    fn test_blob_background_is_decoded_and_fitted() {
        let settings = ButtonSettings {
            background: Background::NewImage(bmp_blob([200, 10, 20], 4)),
            ..Default::default()
        };
        let img = render(&ButtonRenderer::default(), settings, (16, 16));
        assert_eq!(img.dimensions(), (16, 16));
        assert!(close(img.get_pixel(8, 8).0, [200, 10, 20, 255]));
    }

    #[test]
    fn test_bad_blob_renders_placeholder() {
        let settings = ButtonSettings {
            background: Background::NewImage("%%% not base64".into()),
            ..Default::default()
        };
        let img = render(&ButtonRenderer::default(), settings, (8, 8));
        assert_eq!(img, missing_image(8, 8));
        assert!(decode_blob("aGVsbG8=").is_err());
    }

    #[test]
    fn test_existing_image_comes_from_collection() {
        let renderer = ButtonRenderer::default();
        let settings = ButtonSettings {
            background: Background::ExistingImage("logo".into()),
            ..Default::default()
        };
        assert_eq!(
            render(&renderer, settings.clone(), (6, 6)),
            missing_image(6, 6)
        );

        renderer.images().insert(
            "logo",
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 90, 0, 255]))),
        );
        let img = render(&renderer, settings, (6, 6));
        assert!(close(img.get_pixel(3, 3).0, [0, 90, 0, 255]));
        assert!(renderer.images().remove("logo"));
    }

    #[test]
    fn test_text_layer_needs_a_loaded_font() {
        let renderer = ButtonRenderer::default();
        let settings = ButtonSettings {
            background: Background::Solid([0, 0, 0, 255]),
            text: vec![TextLayer {
                text: "A".into(),
                font: "sans".into(),
                size: 40.0,
                ..Default::default()
            }],
            ..Default::default()
        };
        let plain = render(&renderer, settings.clone(), (72, 72));
        assert!(plain.pixels().all(|p| p.0 == [0, 0, 0, 255]));

        let Some(fonts) = system_fonts() else { return };
        let renderer = ButtonRenderer::new(ImageCollection::default(), fonts);
        let texted = render(&renderer, settings, (72, 72));
        assert!(texted.pixels().any(|p| p.0[0] > 200));
    }

    #[test]
    fn test_cache_opt_out() {
        let r = ButtonRenderer::default();
        assert!(r.cacheable(&ButtonSettings::default()));
        assert!(!r.cacheable(&ButtonSettings {
            to_cache: false,
            ..Default::default()
        }));
    }
}
