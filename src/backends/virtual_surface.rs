//! In-process control surface.
//!
//! [`VirtualSurface`] is the "hardware" side: tests and demos feed raw
//! events into it. The matching [`VirtualEventSource`] and
//! [`RecordingWriter`] are what a [`Device`](crate::device::Device) sees.
//! Dropping the surface (or calling [`VirtualSurface::unplug`]) makes the
//! source report a disconnect, as if the cable was pulled.

use crate::device::{DisplayTarget, DisplayWriter, Driver, DriverConnection, RawEventSource};
use crate::error::DeviceError;
use crate::event::{Point, RawEvent};
use crate::layout::DeviceCapabilities;
use crate::metadata::PartialIdentifier;
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Feed = Result<RawEvent, DeviceError>;

/// Feeding end of a virtual device.
pub struct VirtualSurface {
    tx: Sender<Feed>,
    writer: Arc<RecordingWriter>,
}

impl VirtualSurface {
    /// Create a surface and the connection a device is built from.
    pub fn new(capabilities: DeviceCapabilities) -> (Self, DriverConnection) {
        Self::with_writer(capabilities, Arc::new(RecordingWriter::default()))
    }

    pub fn with_writer(
        capabilities: DeviceCapabilities,
        writer: Arc<RecordingWriter>,
    ) -> (Self, DriverConnection) {
        let (tx, rx) = mpsc::channel();
        let connection = DriverConnection {
            capabilities,
            source: Box::new(VirtualEventSource { rx }),
            writer: writer.clone(),
        };
        (Self { tx, writer }, connection)
    }

    pub fn writer(&self) -> &Arc<RecordingWriter> {
        &self.writer
    }

    /// Inject a raw input event.
    pub fn feed(&self, event: RawEvent) {
        // A closed channel means the device is gone; nothing to deliver to.
        let _ = self.tx.send(Ok(event));
    }

    /// Make the next read fail with `error`.
    pub fn fail_read(&self, error: DeviceError) {
        let _ = self.tx.send(Err(error));
    }

    pub fn press_button(&self, key: u16) {
        self.feed(RawEvent::ButtonPressed { key });
    }

    pub fn release_button(&self, key: u16) {
        self.feed(RawEvent::ButtonReleased { key });
    }

    pub fn press_encoder(&self, encoder: u16) {
        self.feed(RawEvent::EncoderPressed { encoder });
    }

    pub fn release_encoder(&self, encoder: u16) {
        self.feed(RawEvent::EncoderReleased { encoder });
    }

    pub fn twist(&self, encoder: u16, delta: i8) {
        self.feed(RawEvent::EncoderTwist { encoder, delta });
    }

    pub fn tap(&self, x: u16, y: u16) {
        self.feed(RawEvent::TouchPress { x, y });
    }

    pub fn long_press(&self, x: u16, y: u16) {
        self.feed(RawEvent::TouchLongPress { x, y });
    }

    pub fn swipe(&self, from: Point, to: Point) {
        self.feed(RawEvent::TouchSwipe { from, to });
    }

    /// Disconnect the surface.
    pub fn unplug(self) {}
}

/// Reading end; one event per read.
pub struct VirtualEventSource {
    rx: Receiver<Feed>,
}

impl RawEventSource for VirtualEventSource {
    fn read(&mut self, timeout: Duration) -> Result<Vec<RawEvent>, DeviceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(vec![event]),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }
}

/// Display writer that remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingWriter {
    uploads: Mutex<Vec<(DisplayTarget, u32, u32)>>,
    clears: Mutex<Vec<DisplayTarget>>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl RecordingWriter {
    /// `(target, width, height)` of every successful upload, in order.
    pub fn uploads(&self) -> Vec<(DisplayTarget, u32, u32)> {
        self.uploads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clears(&self) -> Vec<DisplayTarget> {
        self.clears.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make every write take at least `delay`, to widen race windows.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Make writes fail until reset.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl RecordingWriter {
    fn stall(&self) {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }
}

impl DisplayWriter for RecordingWriter {
    fn write_image(&self, target: DisplayTarget, image: &DynamicImage) -> Result<(), DeviceError> {
        self.stall();
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceError::Io("simulated write failure".into()));
        }
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((target, image.width(), image.height()));
        Ok(())
    }

    fn clear(&self, target: DisplayTarget) -> Result<(), DeviceError> {
        self.stall();
        self.clears
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(target);
        Ok(())
    }
}

struct Attached {
    id: PartialIdentifier,
    capabilities: DeviceCapabilities,
    connection: Option<DriverConnection>,
}

/// Driver over a fixed set of virtual surfaces.
///
/// Connecting hands out the pending connection registered for that
/// identifier; each surface can be connected once.
#[derive(Default)]
pub struct VirtualDriver {
    attached: Mutex<HashMap<String, Attached>>,
}

impl VirtualDriver {
    /// Attach a surface. Returns the feeding end.
    pub fn attach(
        &self,
        identifier: &str,
        description: &str,
        capabilities: DeviceCapabilities,
    ) -> VirtualSurface {
        let (surface, connection) = VirtualSurface::new(capabilities.clone());
        self.attached.lock().unwrap_or_else(|e| e.into_inner()).insert(
            identifier.to_string(),
            Attached {
                id: PartialIdentifier::new(identifier, description),
                capabilities,
                connection: Some(connection),
            },
        );
        surface
    }

    /// Remove a surface from enumeration.
    pub fn detach(&self, identifier: &str) {
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identifier);
    }
}

impl Driver for VirtualDriver {
    fn list_devices(&self) -> Vec<PartialIdentifier> {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = attached.values().map(|a| a.id.clone()).collect();
        out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        out
    }

    fn describe(&self, device: &PartialIdentifier) -> Option<DeviceCapabilities> {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        attached
            .get(&device.identifier)
            .map(|a| a.capabilities.clone())
    }

    fn connect(&self, device: &PartialIdentifier) -> Result<DriverConnection, DeviceError> {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        attached
            .get_mut(&device.identifier)
            .and_then(|a| a.connection.take())
            .ok_or(DeviceError::Disconnected)
    }
}
