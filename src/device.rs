//! Device abstraction.
//!
//! A [`Device`] owns the [`Input`] layout derived from its
//! [`DeviceCapabilities`] and one dedicated reader thread that turns the
//! driver's [`RawEvent`]s into input callbacks.
//!
//! # Lifecycle
//! `Constructing → Running → Disposing → Disposed`
//!
//! - [`Device::start`] spawns the reader thread.
//! - The reader loop checks the liveness flag at the top of every iteration
//!   and reads with a bounded timeout, so clearing the flag is enough to stop
//!   it within one timeout.
//! - [`Device::dispose`] is idempotent. It cancels pending long-press
//!   releases, joins the reader and drops the hardware handle. Uploads that
//!   are already in flight are not awaited; later ones fail with
//!   [`DeviceError::Disposed`].
//!
//! # Threading
//! Input callbacks run on the reader thread, in the order the hardware
//! reported the events. The one exception is the delayed release of a
//! long-press, which runs as a tokio task so the reader is never blocked.

use crate::config::CoreConfig;
use crate::error::DeviceError;
use crate::event::{InputDesc, InputKind, RawEvent};
use crate::input::{Input, InputDisplay};
use crate::layout::{build_inputs, push_composite, DeviceCapabilities};
use crate::metadata::{DeviceIdentifier, DeviceMetadata, PartialIdentifier};
use crate::snapshot::Snapshot;
use image::DynamicImage;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Addressable display area on a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayTarget {
    Key(u16),
    Strip {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Device-specific encode-and-transmit. Calls block; the pipeline runs them
/// on tokio's blocking pool.
pub trait DisplayWriter: Send + Sync + 'static {
    fn write_image(&self, target: DisplayTarget, image: &DynamicImage) -> Result<(), DeviceError>;

    /// Blank the target.
    fn clear(&self, target: DisplayTarget) -> Result<(), DeviceError>;
}

/// Blocking per-device event source.
pub trait RawEventSource: Send + 'static {
    /// Wait at most `timeout` for hardware events. An empty vector means the
    /// timeout elapsed.
    fn read(&mut self, timeout: Duration) -> Result<Vec<RawEvent>, DeviceError>;
}

/// Everything a driver hands over for one opened device.
pub struct DriverConnection {
    pub capabilities: DeviceCapabilities,
    pub source: Box<dyn RawEventSource>,
    pub writer: Arc<dyn DisplayWriter>,
}

/// A hardware family. Drivers only know driver-local identifiers; the
/// manager namespaces them with the driver's registered name.
pub trait Driver: Send + Sync + 'static {
    /// Devices currently attached.
    fn list_devices(&self) -> Vec<PartialIdentifier>;

    /// Capabilities of an attached device, without opening it.
    fn describe(&self, device: &PartialIdentifier) -> Option<DeviceCapabilities>;

    /// Open the device.
    fn connect(&self, device: &PartialIdentifier) -> Result<DriverConnection, DeviceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeviceState {
    Constructing = 0,
    Running = 1,
    Disposing = 2,
    Disposed = 3,
}

impl DeviceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DeviceState::Constructing,
            1 => DeviceState::Running,
            2 => DeviceState::Disposing,
            _ => DeviceState::Disposed,
        }
    }
}

/// Delayed callbacks tied to a device's lifetime.
///
/// Every scheduled callback races its delay against the shutdown signal;
/// [`DeferredTasks::cancel_all`] drops everything that has not fired yet.
pub(crate) struct DeferredTasks {
    runtime: Handle,
    shutdown: watch::Sender<bool>,
}

impl DeferredTasks {
    pub(crate) fn new(runtime: Handle) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { runtime, shutdown }
    }

    pub(crate) fn schedule(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        let mut cancelled = self.shutdown.subscribe();
        if *cancelled.borrow() {
            return;
        }
        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => f(),
                _ = cancelled.changed() => {}
            }
        });
    }

    pub(crate) fn cancel_all(&self) {
        self.shutdown.send_replace(true);
    }
}

fn record(snapshot: &RwLock<Snapshot>, input: u16, kind: &InputKind) {
    snapshot
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .apply(input, kind);
}

/// Routes raw events to inputs. Lives on the reader thread.
struct Dispatcher {
    device: String,
    caps: DeviceCapabilities,
    inputs: Arc<Vec<Input>>,
    snapshot: Arc<RwLock<Snapshot>>,
    deferred: Arc<DeferredTasks>,
    long_press_release: Duration,
}

impl Dispatcher {
    fn dispatch(&self, event: RawEvent) {
        match event {
            RawEvent::ButtonPressed { key } => self.key(key, true),
            RawEvent::ButtonReleased { key } => self.key(key, false),
            RawEvent::EncoderPressed { encoder } => self.encoder(encoder, Some(true), 0),
            RawEvent::EncoderReleased { encoder } => self.encoder(encoder, Some(false), 0),
            RawEvent::EncoderTwist { encoder, delta } => self.encoder(encoder, None, delta),
            RawEvent::TouchPress { x, y } => self.touch(x, y, false),
            RawEvent::TouchLongPress { x, y } => self.touch(x, y, true),
            RawEvent::TouchSwipe { from, to } => {
                if let Some(Input::DisplaySegment(strip)) = self.strip() {
                    record(&self.snapshot, self.caps.key_count, &InputKind::Dragged { from, to });
                    strip.dragged(from, to);
                } else {
                    self.ignored("swipe without a strip");
                }
            }
        }
    }

    fn ignored(&self, what: &str) {
        debug!(device = %self.device, what, "raw event ignored");
    }

    fn key(&self, key: u16, pressed: bool) {
        let input = if key < self.caps.key_count {
            self.inputs.get(usize::from(key))
        } else {
            None
        };
        let kind = if pressed {
            InputKind::Pressed
        } else {
            InputKind::Released
        };
        match input {
            Some(Input::Button(b)) => {
                record(&self.snapshot, key, &kind);
                if pressed {
                    b.pressed()
                } else {
                    b.released()
                }
            }
            Some(Input::ButtonWithoutDisplay(b)) => {
                record(&self.snapshot, key, &kind);
                if pressed {
                    b.pressed()
                } else {
                    b.released()
                }
            }
            _ => return self.ignored("key index out of range"),
        }
        self.update_composites(key);
    }

    fn encoder(&self, encoder: u16, pressed: Option<bool>, delta: i8) {
        let Some(index) = self.caps.encoder_index(encoder) else {
            return self.ignored("encoder index out of range");
        };
        let Some(Input::Encoder(e)) = self.inputs.get(usize::from(index)) else {
            return self.ignored("encoder slot is not an encoder");
        };
        match pressed {
            Some(true) => {
                record(&self.snapshot, index, &InputKind::Pressed);
                e.pressed();
            }
            Some(false) => {
                record(&self.snapshot, index, &InputKind::Released);
                e.released();
            }
            None => {
                record(&self.snapshot, index, &InputKind::Twisted { delta });
                e.twisted(delta);
                return;
            }
        }
        self.update_composites(index);
    }

    fn strip(&self) -> Option<&Input> {
        self.caps
            .strip_index()
            .and_then(|i| self.inputs.get(usize::from(i)))
    }

    fn touch(&self, x: u16, y: u16, long: bool) {
        let Some(Input::DisplaySegment(strip)) = self.strip() else {
            return self.ignored("touch without a strip");
        };
        let index = self.caps.key_count;
        let quadrant = strip.quadrant_at(x);
        record(
            &self.snapshot,
            index,
            &InputKind::TouchPressed {
                position: (x, y),
                quadrant,
            },
        );
        strip.pressed(x, y);

        let release = InputKind::TouchReleased {
            position: (x, y),
            quadrant,
        };
        if !long {
            // A tap has no hardware release; synthesize one so release-bound triggers fire.
            record(&self.snapshot, index, &release);
            strip.released(x, y);
            return;
        }

        let inputs = self.inputs.clone();
        let snapshot = self.snapshot.clone();
        self.deferred.schedule(self.long_press_release, move || {
            if let Some(Input::DisplaySegment(strip)) = inputs.get(usize::from(index)) {
                record(&snapshot, index, &release);
                strip.released(x, y);
            }
        });
    }

    /// Composites are chords: pressed once every member is held, released
    /// as soon as one member lets go.
    fn update_composites(&self, member: u16) {
        for input in self.inputs.iter() {
            let Input::ScreenlessComposite(chord) = input else {
                continue;
            };
            if !chord.members().contains(&member) {
                continue;
            }
            let (held, active) = {
                let snap = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
                (
                    chord.members().iter().all(|m| snap.is_pressed(*m)),
                    snap.is_pressed(input.index()),
                )
            };
            if held && !active {
                record(&self.snapshot, input.index(), &InputKind::Pressed);
                chord.pressed();
            } else if !held && active {
                record(&self.snapshot, input.index(), &InputKind::Released);
                chord.released();
            }
        }
    }
}

struct ReaderTimings {
    timeout: Duration,
    backoff: Duration,
}

fn reader_loop(
    mut source: Box<dyn RawEventSource>,
    alive: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    dispatcher: Dispatcher,
    timings: ReaderTimings,
) {
    info!(device = %dispatcher.device, "reader loop started");
    while alive.load(Ordering::SeqCst) {
        match source.read(timings.timeout) {
            Ok(events) => {
                for event in events {
                    if !alive.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(device = %dispatcher.device, ?event, "raw event");
                    dispatcher.dispatch(event);
                }
            }
            Err(e) if e.is_disconnect() => {
                warn!(device = %dispatcher.device, error = %e, "device lost");
                lost.store(true, Ordering::SeqCst);
                alive.store(false, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                warn!(device = %dispatcher.device, error = %e, "read failed, retrying");
                std::thread::sleep(timings.backoff);
            }
        }
    }
    drop(source);
    info!(device = %dispatcher.device, "reader loop stopped");
}

/// A connected control surface.
pub struct Device {
    id: DeviceIdentifier,
    caps: DeviceCapabilities,
    inputs: Arc<Vec<Input>>,
    alive: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    state: AtomicU8,
    snapshot: Arc<RwLock<Snapshot>>,
    deferred: Arc<DeferredTasks>,
    config: CoreConfig,
    source: Mutex<Option<Box<dyn RawEventSource>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// Build the input layout for an opened device. Deferred callbacks are
    /// spawned on `runtime`.
    pub fn new(
        id: DeviceIdentifier,
        connection: DriverConnection,
        config: &CoreConfig,
        runtime: Handle,
    ) -> Self {
        let DriverConnection {
            capabilities,
            source,
            writer,
        } = connection;
        let alive = Arc::new(AtomicBool::new(true));
        let inputs = build_inputs(&capabilities, config.strip_quadrants, &writer, &alive);
        debug!(device = %id, inputs = inputs.len(), "layout built");

        Self {
            id,
            caps: capabilities,
            inputs: Arc::new(inputs),
            alive,
            lost: Arc::new(AtomicBool::new(false)),
            state: AtomicU8::new(DeviceState::Constructing as u8),
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
            deferred: Arc::new(DeferredTasks::new(runtime)),
            config: config.clone(),
            source: Mutex::new(Some(source)),
            reader: Mutex::new(None),
        }
    }

    /// Add a screenless chord over existing physical inputs. Only possible
    /// before [`Device::start`].
    pub fn add_composite(&mut self, members: Vec<u16>) -> Result<u16, DeviceError> {
        let physical = self.caps.input_count();
        if let Some(bad) = members.iter().find(|m| usize::from(**m) >= physical) {
            return Err(DeviceError::InvalidInput(*bad));
        }
        if self.state() != DeviceState::Constructing {
            return Err(DeviceError::Disposed);
        }
        let inputs = Arc::get_mut(&mut self.inputs).ok_or(DeviceError::Disposed)?;
        Ok(push_composite(inputs, members))
    }

    /// Enter `Running` and spawn the reader thread.
    ///
    /// Starting a running device is a no-op; starting a disposed one fails.
    pub fn start(&self) -> Result<(), DeviceError> {
        if let Err(current) = self.state.compare_exchange(
            DeviceState::Constructing as u8,
            DeviceState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return match DeviceState::from_u8(current) {
                DeviceState::Running => Ok(()),
                _ => Err(DeviceError::Disposed),
            };
        }

        let source = self
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(DeviceError::Disposed)?;

        let dispatcher = Dispatcher {
            device: self.id.to_string(),
            caps: self.caps.clone(),
            inputs: self.inputs.clone(),
            snapshot: self.snapshot.clone(),
            deferred: self.deferred.clone(),
            long_press_release: self.config.long_press_release(),
        };
        let timings = ReaderTimings {
            timeout: self.config.reader_timeout(),
            backoff: self.config.read_error_backoff(),
        };
        let alive = self.alive.clone();
        let lost = self.lost.clone();

        let handle = std::thread::Builder::new()
            .name(format!("deckhand-reader-{}", self.id.identifier))
            .spawn(move || reader_loop(source, alive, lost, dispatcher, timings))
            .map_err(|e| {
                self.alive.store(false, Ordering::SeqCst);
                self.state
                    .store(DeviceState::Disposed as u8, Ordering::SeqCst);
                DeviceError::Io(e.to_string())
            })?;
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(device = %self.id, "device running");
        Ok(())
    }

    /// Stop the reader, cancel pending releases and release the hardware.
    /// Safe to call any number of times, from any thread, including from an
    /// input callback on the reader thread itself.
    pub fn dispose(&self) {
        let claimed = self.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
            (s < DeviceState::Disposing as u8).then_some(DeviceState::Disposing as u8)
        });
        if claimed.is_err() {
            return;
        }

        self.alive.store(false, Ordering::SeqCst);
        self.deferred.cancel_all();

        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = reader {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                warn!(device = %self.id, "reader thread panicked");
            }
        }
        // Never started: the source is still ours.
        drop(self.source.lock().unwrap_or_else(|e| e.into_inner()).take());

        self.state
            .store(DeviceState::Disposed as u8, Ordering::SeqCst);
        info!(device = %self.id, "device disposed");
    }

    pub fn id(&self) -> &DeviceIdentifier {
        &self.id
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    pub fn metadata(&self) -> DeviceMetadata {
        DeviceMetadata {
            identifier: self.id.clone(),
            capabilities: self.caps.clone(),
        }
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the device still accepts uploads and delivers events.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether the reader observed the hardware going away.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn input(&self, index: u16) -> Option<&Input> {
        self.inputs.get(usize::from(index))
    }

    /// Display of input `index`.
    pub fn display(&self, index: u16) -> Result<&dyn InputDisplay, DeviceError> {
        self.input(index)
            .ok_or(DeviceError::InvalidInput(index))?
            .display()
            .ok_or(DeviceError::NoDisplay(index))
    }

    pub fn describe(&self) -> Vec<InputDesc> {
        self.caps.describe()
    }

    /// Current derived input state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.dispose();
    }
}
