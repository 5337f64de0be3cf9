//! Input hierarchy.
//!
//! Every element of a device layout is an [`Input`]. Each variant exposes
//! only the callbacks that make sense for it: buttons press and release,
//! encoders also twist, display segments report touch positions and drags.
//! Calling a callback emits an [`InputEvent`] to the listeners registered on
//! that input.
//!
//! Display-capable variants ([`Button`] and [`DisplaySegment`]) also
//! implement [`InputDisplay`], the contract the render pipeline uploads
//! through.

use crate::device::{DisplayTarget, DisplayWriter};
use crate::error::DeviceError;
use crate::event::{InputEvent, InputKind, InputType, Point};
use crate::eventbus::{EventFilter, InputEventBus, InputListener};
use async_trait::async_trait;
use image::DynamicImage;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Width and height in pixels.
pub type Resolution = (u32, u32);

/// Operations a display-capable input supports.
#[async_trait]
pub trait InputDisplay: Send + Sync {
    /// Pixel size of the display, fixed at construction.
    fn display_resolution(&self) -> Resolution;

    /// Salt a content hash with whatever makes this display's encoding
    /// distinct. Pure and deterministic.
    fn append_hash_key(&self, base_key: u64) -> u64;

    /// Encode and transmit `image`, then remember `key` as resident.
    async fn upload_image(&self, key: u64, image: DynamicImage) -> Result<(), DeviceError>;

    /// Whether the image behind `key` is what the display currently holds.
    fn is_cached(&self, key: u64) -> bool;

    /// Blank the display and forget the cached key.
    async fn clear(&self) -> Result<(), DeviceError>;
}

/// Single-entry image cache.
///
/// A display shows one image at a time, so only the most recent key is
/// resident. Uploading anything else evicts it.
#[derive(Debug, Default)]
pub struct DisplayCache {
    current: Mutex<Option<u64>>,
}

impl DisplayCache {
    pub fn contains(&self, key: u64) -> bool {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) == Some(key)
    }

    pub fn record(&self, key: u64) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(key);
    }

    pub fn forget(&self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn current(&self) -> Option<u64> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Listener plumbing shared by every variant.
pub struct InputCore {
    index: u16,
    bus: RwLock<InputEventBus>,
}

impl InputCore {
    pub(crate) fn new(index: u16) -> Self {
        Self {
            index,
            bus: RwLock::new(InputEventBus::new()),
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn add_listener(&self, listener: Arc<dyn InputListener>, filter: EventFilter) -> u64 {
        self.bus
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_listener(listener, filter)
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.bus
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove_listener(id)
    }

    pub fn set_listener_enabled(&self, id: u64, enabled: bool) {
        let mut bus = self.bus.write().unwrap_or_else(|e| e.into_inner());
        if enabled {
            bus.enable(id);
        } else {
            bus.disable(id);
        }
    }

    fn emit(&self, kind: InputKind) {
        let event = InputEvent::now(self.index, kind);
        // Collect under the lock, call outside it: listeners may re-enter the bus.
        let listeners = self
            .bus
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .matching(&event);
        for listener in listeners {
            listener.on_input(&event);
        }
    }
}

/// Upload path shared by keys and strips.
pub struct SlotDisplay {
    target: DisplayTarget,
    resolution: Resolution,
    salt: &'static str,
    writer: Arc<dyn DisplayWriter>,
    alive: Arc<AtomicBool>,
    cache: DisplayCache,
    /// Held across a hardware write and the cache update that follows it.
    writes: AsyncMutex<()>,
}

impl SlotDisplay {
    pub(crate) fn new(
        target: DisplayTarget,
        resolution: Resolution,
        salt: &'static str,
        writer: Arc<dyn DisplayWriter>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            target,
            resolution,
            salt,
            writer,
            alive,
            cache: DisplayCache::default(),
            writes: AsyncMutex::new(()),
        }
    }

    pub fn target(&self) -> DisplayTarget {
        self.target
    }

    pub fn cache(&self) -> &DisplayCache {
        &self.cache
    }

    fn ensure_alive(&self) -> Result<(), DeviceError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::Disposed)
        }
    }
}

#[async_trait]
impl InputDisplay for SlotDisplay {
    fn display_resolution(&self) -> Resolution {
        self.resolution
    }

    fn append_hash_key(&self, base_key: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        base_key.hash(&mut hasher);
        self.salt.hash(&mut hasher);
        self.resolution.hash(&mut hasher);
        hasher.finish()
    }

    async fn upload_image(&self, key: u64, image: DynamicImage) -> Result<(), DeviceError> {
        self.ensure_alive()?;
        let writer = self.writer.clone();
        let target = self.target;
        let _writing = self.writes.lock().await;
        tokio::task::spawn_blocking(move || writer.write_image(target, &image))
            .await
            .map_err(|e| DeviceError::Io(e.to_string()))??;
        self.cache.record(key);
        debug!(?target, key, "image uploaded");
        Ok(())
    }

    fn is_cached(&self, key: u64) -> bool {
        self.cache.contains(key)
    }

    async fn clear(&self) -> Result<(), DeviceError> {
        self.ensure_alive()?;
        let writer = self.writer.clone();
        let target = self.target;
        let _writing = self.writes.lock().await;
        let result = tokio::task::spawn_blocking(move || writer.clear(target))
            .await
            .map_err(|e| DeviceError::Io(e.to_string()))
            .and_then(|r| r);
        // Even a failed clear may have reached the panel.
        self.cache.forget();
        result
    }
}

/// Key with its own display.
pub struct Button {
    core: InputCore,
    display: SlotDisplay,
}

impl Button {
    pub(crate) fn new(core: InputCore, display: SlotDisplay) -> Self {
        Self { core, display }
    }

    pub fn pressed(&self) {
        self.core.emit(InputKind::Pressed);
    }

    pub fn released(&self) {
        self.core.emit(InputKind::Released);
    }

    pub fn display(&self) -> &SlotDisplay {
        &self.display
    }
}

/// Key without a display, e.g. a foot pedal.
pub struct PlainButton {
    core: InputCore,
}

impl PlainButton {
    pub(crate) fn new(core: InputCore) -> Self {
        Self { core }
    }

    pub fn pressed(&self) {
        self.core.emit(InputKind::Pressed);
    }

    pub fn released(&self) {
        self.core.emit(InputKind::Released);
    }
}

/// Endless rotary encoder with a push switch.
pub struct Encoder {
    core: InputCore,
}

impl Encoder {
    pub(crate) fn new(core: InputCore) -> Self {
        Self { core }
    }

    pub fn pressed(&self) {
        self.core.emit(InputKind::Pressed);
    }

    pub fn released(&self) {
        self.core.emit(InputKind::Released);
    }

    pub fn twisted(&self, delta: i8) {
        self.core.emit(InputKind::Twisted { delta });
    }
}

/// Touch-capable display strip, split horizontally into equal quadrants.
pub struct DisplaySegment {
    core: InputCore,
    display: SlotDisplay,
    quadrants: u8,
}

impl DisplaySegment {
    pub(crate) fn new(core: InputCore, display: SlotDisplay, quadrants: u8) -> Self {
        Self {
            core,
            display,
            quadrants: quadrants.max(1),
        }
    }

    pub fn quadrants(&self) -> u8 {
        self.quadrants
    }

    /// Which quadrant a horizontal pixel position falls into.
    ///
    /// Positions past the right edge clamp to the last quadrant.
    pub fn quadrant_at(&self, x: u16) -> u8 {
        let width = self.display.resolution.0.max(1);
        let slice = (width / u32::from(self.quadrants)).max(1);
        let q = u32::from(x) / slice;
        q.min(u32::from(self.quadrants) - 1) as u8
    }

    pub fn pressed(&self, x: u16, y: u16) {
        let quadrant = self.quadrant_at(x);
        self.core.emit(InputKind::TouchPressed {
            position: (x, y),
            quadrant,
        });
    }

    pub fn released(&self, x: u16, y: u16) {
        let quadrant = self.quadrant_at(x);
        self.core.emit(InputKind::TouchReleased {
            position: (x, y),
            quadrant,
        });
    }

    pub fn dragged(&self, from: Point, to: Point) {
        self.core.emit(InputKind::Dragged { from, to });
    }

    pub fn display(&self) -> &SlotDisplay {
        &self.display
    }
}

/// Virtual input grouping several physical inputs that have no screen,
/// e.g. a chord of pedal switches. It carries triggers only.
pub struct ScreenlessComposite {
    core: InputCore,
    members: Vec<u16>,
}

impl ScreenlessComposite {
    pub(crate) fn new(core: InputCore, members: Vec<u16>) -> Self {
        Self { core, members }
    }

    pub fn members(&self) -> &[u16] {
        &self.members
    }

    pub fn pressed(&self) {
        self.core.emit(InputKind::Pressed);
    }

    pub fn released(&self) {
        self.core.emit(InputKind::Released);
    }
}

/// One element of a device layout.
pub enum Input {
    Button(Button),
    ButtonWithoutDisplay(PlainButton),
    Encoder(Encoder),
    DisplaySegment(DisplaySegment),
    ScreenlessComposite(ScreenlessComposite),
}

impl Input {
    fn core(&self) -> &InputCore {
        match self {
            Input::Button(b) => &b.core,
            Input::ButtonWithoutDisplay(b) => &b.core,
            Input::Encoder(e) => &e.core,
            Input::DisplaySegment(s) => &s.core,
            Input::ScreenlessComposite(c) => &c.core,
        }
    }

    /// Layout index.
    pub fn index(&self) -> u16 {
        self.core().index()
    }

    pub fn ty(&self) -> InputType {
        match self {
            Input::Button(_) => InputType::Button,
            Input::ButtonWithoutDisplay(_) => InputType::ButtonWithoutDisplay,
            Input::Encoder(_) => InputType::Encoder,
            Input::DisplaySegment(_) => InputType::DisplaySegment,
            Input::ScreenlessComposite(_) => InputType::ScreenlessComposite,
        }
    }

    /// The display capability, for variants that have one.
    pub fn display(&self) -> Option<&dyn InputDisplay> {
        match self {
            Input::Button(b) => Some(&b.display),
            Input::DisplaySegment(s) => Some(&s.display),
            _ => None,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn InputListener>, filter: EventFilter) -> u64 {
        self.core().add_listener(listener, filter)
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.core().remove_listener(id)
    }

    pub fn set_listener_enabled(&self, id: u64, enabled: bool) {
        self.core().set_listener_enabled(id, enabled)
    }
}
