//! Render/cache pipeline.
//!
//! `ScreenItem` + `Input` → device pixels, uploading each distinct content at
//! most once per display:
//!
//! 1. resolve the item's renderer, normalizing its settings blob;
//! 2. hash renderer, settings and input into a base key, then let the
//!    display salt it;
//! 3. take the per-key lock and check the display's cache, unless the
//!    settings opt out of caching;
//! 4. on a miss, render on the blocking pool and upload.
//!
//! Requests for the same key are serialized; different keys run in parallel.

use super::base_cache_key;
use crate::error::RenderError;
use crate::input::Input;
use crate::registry::Registry;
use crate::screen::ScreenItem;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// What a render request ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The display already showed this content.
    Cached { key: u64 },
    /// Rendered and uploaded.
    Uploaded { key: u64 },
    /// The item names no renderer, or one that is not registered.
    NoRenderer,
    /// The input has no display.
    NotDisplayable,
}

/// Per-key async locks. Entries exist only while someone holds or waits
/// for them.
#[derive(Default)]
pub struct KeyLocks {
    map: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: u64) -> KeyGuard<'_> {
        let lock = self
            .map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .clone();
        let guard = lock.clone().lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            lock,
            guard: Some(guard),
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn in_flight(&self) -> usize {
        self.map.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: u64,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.map.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this guard still reference the lock: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.key);
        }
    }
}

pub struct RenderPipeline {
    registry: Arc<Registry>,
    locks: KeyLocks,
}

impl RenderPipeline {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            locks: KeyLocks::default(),
        }
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Bring `input`'s display up to date with `item`.
    ///
    /// A failed upload leaves the cache untouched, so retrying re-renders.
    pub async fn render(
        &self,
        item: &mut ScreenItem,
        input: &Input,
    ) -> Result<RenderOutcome, RenderError> {
        let ScreenItem::Renderable(renderable) = item else {
            return Ok(RenderOutcome::NoRenderer);
        };
        let Some(display) = input.display() else {
            return Ok(RenderOutcome::NotDisplayable);
        };
        let Some(renderer) = renderable.resolve(&self.registry) else {
            return Ok(RenderOutcome::NoRenderer);
        };
        let (Some(name), Some(settings)) = (renderable.renderer.clone(), renderable.settings.clone())
        else {
            return Ok(RenderOutcome::NoRenderer);
        };

        let key = display.append_hash_key(base_cache_key(&name, &settings, Some(input.index())));
        let _guard = self.locks.lock(key).await;

        if renderer.cacheable_erased(&settings) && display.is_cached(key) {
            debug!(input = input.index(), key, "render cache hit");
            return Ok(RenderOutcome::Cached { key });
        }

        let resolution = display.display_resolution();
        let image = tokio::task::spawn_blocking(move || renderer.render_erased(&settings, resolution))
            .await
            .map_err(|e| RenderError::Task(e.to_string()))??;

        if let Err(e) = display.upload_image(key, image).await {
            warn!(input = input.index(), renderer = %name, error = %e, "upload failed");
            return Err(e.into());
        }
        debug!(input = input.index(), key, "rendered and uploaded");
        Ok(RenderOutcome::Uploaded { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_surface::{RecordingWriter, VirtualSurface};
    use crate::config::CoreConfig;
    use crate::device::Device;
    use crate::input::Resolution;
    use crate::layout::DeviceCapabilities;
    use crate::metadata::PartialIdentifier;
    use crate::plugin::{core_plugin, PluginBuilder};
    use crate::registry::NamespacedName;
    use crate::render::builtin::{Background, ButtonRenderer, ButtonSettings};
    use crate::render::{Renderer, RendererSettings};
    use crate::screen::{RenderableItem, ScreenlessItem};
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::runtime::Handle;

    #[derive(Clone, Default)]
    struct Counting(Arc<AtomicUsize>);

    impl Renderer for Counting {
        type Settings = ButtonSettings;

        fn render(
            &self,
            settings: &ButtonSettings,
            resolution: Resolution,
        ) -> Result<DynamicImage, RenderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ButtonRenderer::default().render(settings, resolution)
        }

        fn cacheable(&self, settings: &ButtonSettings) -> bool {
            settings.to_cache
        }
    }

    fn setup(counting: &Counting) -> (VirtualSurface, Device, RenderPipeline) {
        let mut builder = Registry::builder();
        builder.add_plugin(core_plugin()).unwrap();
        builder
            .add_plugin(
                PluginBuilder::new("test")
                    .add_renderer("counting", counting.clone())
                    .build(),
            )
            .unwrap();
        let caps = DeviceCapabilities {
            key_count: 6,
            rows: 2,
            columns: 3,
            encoder_count: 1,
            strip_size: None,
            key_resolution: (72, 72),
        };
        let (surface, connection) =
            VirtualSurface::with_writer(caps, Arc::new(RecordingWriter::default()));
        let id = PartialIdentifier::new("P-1", "Virtual")
            .complete(NamespacedName::new("core", "virtual"));
        let device = Device::new(id, connection, &CoreConfig::default(), Handle::current());
        (surface, device, RenderPipeline::new(Arc::new(builder.build())))
    }

    fn item_with(settings: ButtonSettings) -> ScreenItem {
        ScreenItem::Renderable(RenderableItem {
            renderer: Some(NamespacedName::new("test", "counting")),
            settings: Some(RendererSettings::of(&settings).unwrap()),
            triggers: Vec::new(),
        })
    }

    fn item(background: Background) -> ScreenItem {
        item_with(ButtonSettings {
            background,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_miss_uploads_once_then_hits() {
        let counting = Counting::default();
        let (surface, device, pipeline) = setup(&counting);
        let input = device.input(0).unwrap();
        let mut it = item(Background::Solid([1, 2, 3, 255]));

        let first = pipeline.render(&mut it, input).await.unwrap();
        let RenderOutcome::Uploaded { key } = first else {
            panic!("expected upload, got {first:?}");
        };
        assert!(device.display(0).unwrap().is_cached(key));
        assert_eq!(surface.writer().uploads().len(), 1);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);

        let second = pipeline.render(&mut it, input).await.unwrap();
        assert_eq!(second, RenderOutcome::Cached { key });
        assert_eq!(surface.writer().uploads().len(), 1);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.locks().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_uncached_settings_upload_every_time() {
        let counting = Counting::default();
        let (surface, device, pipeline) = setup(&counting);
        let input = device.input(4).unwrap();
        let mut it = item_with(ButtonSettings {
            to_cache: false,
            ..ButtonSettings::solid([7, 7, 7, 255])
        });

        let first = pipeline.render(&mut it, input).await.unwrap();
        let second = pipeline.render(&mut it, input).await.unwrap();
        assert!(matches!(first, RenderOutcome::Uploaded { .. }));
        assert_eq!(first, second);
        assert_eq!(surface.writer().uploads().len(), 2);
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_changed_settings_render_again() {
        let counting = Counting::default();
        let (surface, device, pipeline) = setup(&counting);
        let input = device.input(1).unwrap();

        let a = pipeline
            .render(&mut item(Background::Solid([1, 1, 1, 255])), input)
            .await
            .unwrap();
        let b = pipeline
            .render(&mut item(Background::Solid([2, 2, 2, 255])), input)
            .await
            .unwrap();
        assert!(matches!(a, RenderOutcome::Uploaded { .. }));
        assert!(matches!(b, RenderOutcome::Uploaded { .. }));
        assert_ne!(a, b);
        assert_eq!(surface.writer().uploads().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_same_key_uploads_once() {
        let counting = Counting::default();
        let (surface, device, pipeline) = setup(&counting);
        surface.writer().set_delay(Duration::from_millis(50));
        let input = device.input(2).unwrap();
        let mut a = item(Background::Solid([9, 9, 9, 255]));
        let mut b = a.clone();

        let (ra, rb) = tokio::join!(pipeline.render(&mut a, input), pipeline.render(&mut b, input));
        let outcomes = [ra.unwrap(), rb.unwrap()];

        assert_eq!(surface.writer().uploads().len(), 1);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, RenderOutcome::Cached { .. }))
                .count(),
            1
        );
        assert_eq!(pipeline.locks().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_is_retried_fresh() {
        let counting = Counting::default();
        let (surface, device, pipeline) = setup(&counting);
        let input = device.input(3).unwrap();
        let mut it = item(Background::Solid([4, 4, 4, 255]));

        surface.writer().set_failing(true);
        assert!(pipeline.render(&mut it, input).await.is_err());

        surface.writer().set_failing(false);
        let retry = pipeline.render(&mut it, input).await.unwrap();
        assert!(matches!(retry, RenderOutcome::Uploaded { .. }));
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_display_targets_are_skipped() {
        let counting = Counting::default();
        let (_surface, device, pipeline) = setup(&counting);
        let encoder = device.input(6).unwrap();

        let mut it = item(Background::default());
        assert_eq!(
            pipeline.render(&mut it, encoder).await.unwrap(),
            RenderOutcome::NotDisplayable
        );
        let mut screenless = ScreenItem::Screenless(ScreenlessItem::default());
        assert_eq!(
            pipeline
                .render(&mut screenless, device.input(0).unwrap())
                .await
                .unwrap(),
            RenderOutcome::NoRenderer
        );
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disposed_device_fails_upload_without_panicking() {
        let counting = Counting::default();
        let (_surface, device, pipeline) = setup(&counting);
        device.dispose();
        let err = pipeline
            .render(&mut item(Background::default()), device.input(0).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Device(crate::error::DeviceError::Disposed)
        ));
    }
}
