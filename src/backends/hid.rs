//! Elgato Stream Deck driver over `hidapi`.
//!
//! Two report protocols are spoken. The original Stream Deck, the Mini and
//! the MK.2 Mini use v1; Original V2, MK.2, XL, XL V2, Pedal and Plus use v2.
//!
//! # Input reports
//! Every report starts with report id `0x01`.
//!
//! v1 reports carry one byte per key starting at offset 1. The original
//! Stream Deck numbers its keys right to left within each row.
//!
//! In v2 reports `data[1]` selects the payload:
//! - `0x00`: key states, one byte per key starting at offset 4;
//! - `0x02` (Plus): touch strip. `data[4]` is 1 (tap), 2 (long press) or
//!   3 (swipe), followed by little-endian `u16` coordinates at 6, 8 and,
//!   for swipes, the end point at 10, 12;
//! - `0x03` (Plus): encoders. `data[4]` is 0 for press states (one byte per
//!   encoder at offset 5) or 1 for rotation (one `i8` per encoder at offset 5).
//!
//! The hardware reports states, not edges. [`ReportParser`] diffs against
//! the previous report to produce press/release events.
//!
//! # Image uploads
//! v2 images are JPEG-encoded and split into 1024-byte output reports, each
//! a header followed by a payload slice. v1 images are BMP, sent in 8191-byte
//! (Original) or 1024-byte (Mini) reports with a 16-byte header.
//!
//! Panels are mounted in different orientations: most are upside down, the
//! Minis are turned a quarter and mirrored, Plus and Pedal are upright.

use crate::device::{DisplayTarget, DisplayWriter, Driver, DriverConnection, RawEventSource};
use crate::error::DeviceError;
use crate::event::RawEvent;
use crate::layout::DeviceCapabilities;
use crate::metadata::PartialIdentifier;
use crate::plugin::{PluginBuilder, PluginDefinition};
use hidapi::{HidApi, HidDevice};
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const ELGATO_VENDOR_ID: u16 = 0x0fd9;

/// Output report size of every v2 model and of the Minis.
pub const PACKET_SIZE: usize = 1024;
/// Output report size of the original Stream Deck.
pub const ORIGINAL_PACKET_SIZE: usize = 8191;
const KEY_HEADER: usize = 8;
const V1_KEY_HEADER: usize = 16;
const STRIP_HEADER: usize = 16;
const JPEG_QUALITY: u8 = 90;
const READ_BUFFER: usize = 512;
/// Longest single blocking read; the handle is free for writers in between.
const READ_SLICE: Duration = Duration::from_millis(5);

/// Plugin and driver names this backend registers under.
pub const PLUGIN_NAME: &str = "streamdeck-support";
pub const DRIVER_NAME: &str = "elgato-streamdeck";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Original,
    Mini,
    MiniMk2,
    OriginalV2,
    Mk2,
    Xl,
    XlV2,
    Pedal,
    Plus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// BMP images, key states at offset 1.
    V1,
    /// JPEG images, typed input reports.
    V2,
}

const MAPPING: &[(Kind, u16, &str)] = &[
    (Kind::Original, 0x0060, "Stream Deck Original"),
    (Kind::Mini, 0x0063, "Stream Deck Mini"),
    (Kind::MiniMk2, 0x0090, "Stream Deck MK2 Mini"),
    (Kind::OriginalV2, 0x006d, "Stream Deck Original V2"),
    (Kind::Mk2, 0x0080, "Stream Deck MK2"),
    (Kind::Xl, 0x006c, "Stream Deck XL"),
    (Kind::XlV2, 0x008f, "Stream Deck XL V2"),
    (Kind::Pedal, 0x0086, "Stream Deck Pedal"),
    (Kind::Plus, 0x0084, "Stream Deck Plus"),
];

impl Kind {
    pub fn from_pid(pid: u16) -> Option<Kind> {
        MAPPING.iter().find(|(_, p, _)| *p == pid).map(|(k, _, _)| *k)
    }

    pub fn from_description(description: &str) -> Option<Kind> {
        MAPPING
            .iter()
            .find(|(_, _, d)| *d == description)
            .map(|(k, _, _)| *k)
    }

    pub fn pid(self) -> u16 {
        MAPPING
            .iter()
            .find(|(k, _, _)| *k == self)
            .map(|(_, p, _)| *p)
            .unwrap_or_default()
    }

    pub fn description(self) -> &'static str {
        MAPPING
            .iter()
            .find(|(k, _, _)| *k == self)
            .map(|(_, _, d)| *d)
            .unwrap_or("Unknown")
    }

    /// `(rows, columns)`.
    fn grid(self) -> (u16, u16) {
        match self {
            Kind::Original | Kind::OriginalV2 | Kind::Mk2 => (3, 5),
            Kind::Mini | Kind::MiniMk2 => (2, 3),
            Kind::Xl | Kind::XlV2 => (4, 8),
            Kind::Pedal => (1, 3),
            Kind::Plus => (2, 4),
        }
    }

    fn key_size(self) -> u32 {
        match self {
            Kind::Original | Kind::OriginalV2 | Kind::Mk2 => 72,
            Kind::Mini | Kind::MiniMk2 => 80,
            Kind::Xl | Kind::XlV2 => 96,
            Kind::Pedal => 0,
            Kind::Plus => 120,
        }
    }

    pub fn capabilities(self) -> DeviceCapabilities {
        let (rows, columns) = self.grid();
        let size = self.key_size();
        let plus = self == Kind::Plus;
        DeviceCapabilities {
            key_count: rows * columns,
            rows,
            columns,
            encoder_count: if plus { 4 } else { 0 },
            strip_size: plus.then_some((800, 100)),
            key_resolution: (size, size),
        }
    }

    pub fn protocol(self) -> Protocol {
        match self {
            Kind::Original | Kind::Mini | Kind::MiniMk2 => Protocol::V1,
            _ => Protocol::V2,
        }
    }

    fn packet_size(self) -> usize {
        match self {
            Kind::Original => ORIGINAL_PACKET_SIZE,
            _ => PACKET_SIZE,
        }
    }

    /// Translate between layout and hardware key numbering. Its own inverse.
    pub fn hardware_key(self, key: u16) -> u16 {
        if self != Kind::Original {
            return key;
        }
        let (_, columns) = self.grid();
        let (row, col) = (key / columns, key % columns);
        row * columns + (columns - 1 - col)
    }

    /// Undo the panel's mounting so the image appears upright.
    fn orient(self, image: DynamicImage) -> DynamicImage {
        match self {
            Kind::Plus | Kind::Pedal => image,
            Kind::Mini | Kind::MiniMk2 => image.rotate90().flipv(),
            _ => image.rotate180(),
        }
    }

    /// Resize, orient and encode a key image in this model's format.
    pub fn encode_key_image(self, image: &DynamicImage) -> Result<Vec<u8>, DeviceError> {
        let size = self.key_size();
        let img = self.orient(fit(image, size, size));
        match self.protocol() {
            Protocol::V1 => encode_bmp(&img),
            Protocol::V2 => encode_jpeg(&img),
        }
    }

    /// Output reports carrying an encoded key image.
    pub fn key_packets(self, key: u8, payload: &[u8]) -> Vec<Vec<u8>> {
        match self.protocol() {
            Protocol::V1 => v1_key_packets(key, payload, self.packet_size()),
            Protocol::V2 => key_packets(key, payload),
        }
    }
}

/// Turns input reports into edge events.
#[derive(Debug)]
pub struct ReportParser {
    kind: Kind,
    keys: Vec<bool>,
    encoders: Vec<bool>,
}

impl ReportParser {
    pub fn new(kind: Kind) -> Self {
        let caps = kind.capabilities();
        Self {
            kind,
            keys: vec![false; usize::from(caps.key_count)],
            encoders: vec![false; usize::from(caps.encoder_count)],
        }
    }

    pub fn parse(&mut self, data: &[u8]) -> Vec<RawEvent> {
        let mut out = Vec::new();
        if data.len() < 5 || data[0] != 0x01 {
            return out;
        }
        if self.kind.protocol() == Protocol::V1 {
            self.parse_keys(data, 1, &mut out);
            return out;
        }
        match (self.kind, data[1]) {
            (Kind::Plus, 0x02) => Self::parse_touch(data, &mut out),
            (Kind::Plus, 0x03) => self.parse_encoders(data, &mut out),
            (_, 0x00) => self.parse_keys(data, 4, &mut out),
            (_, other) => debug!(report = other, "unknown input report"),
        }
        out
    }

    fn parse_keys(&mut self, data: &[u8], offset: usize, out: &mut Vec<RawEvent>) {
        let kind = self.kind;
        for (key, held) in self.keys.iter_mut().enumerate() {
            let hardware = usize::from(kind.hardware_key(key as u16));
            let Some(byte) = data.get(offset + hardware) else {
                continue;
            };
            let now = *byte != 0;
            if now != *held {
                *held = now;
                let key = key as u16;
                out.push(if now {
                    RawEvent::ButtonPressed { key }
                } else {
                    RawEvent::ButtonReleased { key }
                });
            }
        }
    }

    fn parse_encoders(&mut self, data: &[u8], out: &mut Vec<RawEvent>) {
        match data[4] {
            0x00 => {
                for (encoder, held) in self.encoders.iter_mut().enumerate() {
                    let Some(byte) = data.get(5 + encoder) else { break };
                    let now = *byte != 0;
                    if now != *held {
                        *held = now;
                        let encoder = encoder as u16;
                        out.push(if now {
                            RawEvent::EncoderPressed { encoder }
                        } else {
                            RawEvent::EncoderReleased { encoder }
                        });
                    }
                }
            }
            0x01 => {
                for encoder in 0..self.encoders.len() {
                    let Some(byte) = data.get(5 + encoder) else { break };
                    let delta = *byte as i8;
                    if delta != 0 {
                        out.push(RawEvent::EncoderTwist {
                            encoder: encoder as u16,
                            delta,
                        });
                    }
                }
            }
            other => debug!(mode = other, "unknown encoder report"),
        }
    }

    fn parse_touch(data: &[u8], out: &mut Vec<RawEvent>) {
        let at = |i: usize| -> Option<u16> {
            Some(u16::from_le_bytes([*data.get(i)?, *data.get(i + 1)?]))
        };
        let (Some(x), Some(y)) = (at(6), at(8)) else {
            return;
        };
        match data[4] {
            1 => out.push(RawEvent::TouchPress { x, y }),
            2 => out.push(RawEvent::TouchLongPress { x, y }),
            3 => {
                if let (Some(x1), Some(y1)) = (at(10), at(12)) {
                    out.push(RawEvent::TouchSwipe {
                        from: (x, y),
                        to: (x1, y1),
                    });
                }
            }
            other => debug!(mode = other, "unknown touch report"),
        }
    }
}

/// Split `payload` into zero-padded output reports for a key image.
pub fn key_packets(key: u8, payload: &[u8]) -> Vec<Vec<u8>> {
    chunk(payload, PACKET_SIZE, KEY_HEADER, |page, len, last| {
        let [len_lo, len_hi] = (len as u16).to_le_bytes();
        let [page_lo, page_hi] = (page as u16).to_le_bytes();
        vec![0x02, 0x07, key, u8::from(last), len_lo, len_hi, page_lo, page_hi]
    })
}

/// Split `payload` into zero-padded v1 output reports. `key` is the
/// hardware key number.
pub fn v1_key_packets(key: u8, payload: &[u8], packet_size: usize) -> Vec<Vec<u8>> {
    chunk(payload, packet_size, V1_KEY_HEADER, |page, _, last| {
        let mut header = vec![0x02, 0x01, (page + 1) as u8, 0, u8::from(last), key + 1];
        header.resize(V1_KEY_HEADER, 0);
        header
    })
}

/// Split `payload` into zero-padded output reports for a strip region.
pub fn strip_packets(x: u16, y: u16, width: u16, height: u16, payload: &[u8]) -> Vec<Vec<u8>> {
    chunk(payload, PACKET_SIZE, STRIP_HEADER, |page, len, last| {
        let mut header = vec![0x02, 0x0c];
        for v in [x, y, width, height] {
            header.extend_from_slice(&v.to_le_bytes());
        }
        header.push(u8::from(last));
        header.extend_from_slice(&(page as u16).to_le_bytes());
        header.extend_from_slice(&(len as u16).to_le_bytes());
        header.push(0);
        header
    })
}

fn chunk(
    payload: &[u8],
    packet_size: usize,
    header_len: usize,
    header: impl Fn(usize, usize, bool) -> Vec<u8>,
) -> Vec<Vec<u8>> {
    let body = packet_size - header_len;
    let pages = payload.len().div_ceil(body).max(1);
    (0..pages)
        .map(|page| {
            let start = page * body;
            let end = (start + body).min(payload.len());
            let slice = &payload[start.min(end)..end];
            let mut packet = header(page, slice.len(), page + 1 == pages);
            packet.extend_from_slice(slice);
            packet.resize(packet_size, 0);
            packet
        })
        .collect()
}

fn fit(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() == width && image.height() == height {
        image.clone()
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, DeviceError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&image.to_rgb8())?;
    Ok(out)
}

pub fn encode_bmp(image: &DynamicImage) -> Result<Vec<u8>, DeviceError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    BmpEncoder::new(&mut out).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

/// Poll `read` with waits of at most `slice` until it yields data or
/// `timeout` has passed.
fn read_sliced<E>(
    timeout: Duration,
    slice: Duration,
    mut read: impl FnMut(Duration) -> Result<usize, E>,
) -> Result<usize, E> {
    let deadline = Instant::now() + timeout;
    loop {
        let wait = deadline.saturating_duration_since(Instant::now()).min(slice);
        let n = read(wait)?;
        if n > 0 || Instant::now() >= deadline {
            return Ok(n);
        }
        std::thread::yield_now();
    }
}

type SharedHandle = Arc<Mutex<HidDevice>>;

/// Reading half of an opened Stream Deck.
pub struct HidEventSource {
    device: SharedHandle,
    parser: ReportParser,
    buf: Vec<u8>,
}

impl RawEventSource for HidEventSource {
    fn read(&mut self, timeout: Duration) -> Result<Vec<RawEvent>, DeviceError> {
        let (device, buf) = (&self.device, &mut self.buf);
        // The handle is shared with the writer, so never block on it for the whole timeout.
        let n = read_sliced(timeout, READ_SLICE, |wait| {
            let ms = i32::try_from(wait.as_millis()).unwrap_or(i32::MAX);
            device
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .read_timeout(&mut buf[..], ms)
        })?;
        if n == 0 {
            return Ok(Vec::new());
        }
        Ok(self.parser.parse(&self.buf[..n]))
    }
}

/// Writing half of an opened Stream Deck.
pub struct HidDisplayWriter {
    device: SharedHandle,
    kind: Kind,
}

impl HidDisplayWriter {
    fn send(&self, packets: Vec<Vec<u8>>) -> Result<(), DeviceError> {
        let device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        for packet in packets {
            device.write(&packet)?;
        }
        Ok(())
    }
}

impl DisplayWriter for HidDisplayWriter {
    fn write_image(&self, target: DisplayTarget, image: &DynamicImage) -> Result<(), DeviceError> {
        let packets = match target {
            DisplayTarget::Key(key) => {
                if self.kind.key_size() == 0 {
                    return Err(DeviceError::NoDisplay(key));
                }
                let hardware = u8::try_from(self.kind.hardware_key(key))
                    .map_err(|_| DeviceError::InvalidInput(key))?;
                let encoded = self.kind.encode_key_image(image)?;
                self.kind.key_packets(hardware, &encoded)
            }
            DisplayTarget::Strip {
                x,
                y,
                width,
                height,
            } => {
                let jpeg = encode_jpeg(&fit(image, width, height))?;
                strip_packets(x as u16, y as u16, width as u16, height as u16, &jpeg)
            }
        };
        self.send(packets)
    }

    fn clear(&self, target: DisplayTarget) -> Result<(), DeviceError> {
        let (w, h) = match target {
            DisplayTarget::Key(_) => (self.kind.key_size(), self.kind.key_size()),
            DisplayTarget::Strip { width, height, .. } => (width, height),
        };
        self.write_image(target, &DynamicImage::new_rgb8(w.max(1), h.max(1)))
    }
}

/// Driver enumerating Stream Decks on the USB bus.
pub struct StreamDeckDriver {
    api: Mutex<HidApi>,
}

impl StreamDeckDriver {
    pub fn new() -> Result<Self, DeviceError> {
        Ok(Self {
            api: Mutex::new(HidApi::new()?),
        })
    }
}

impl Driver for StreamDeckDriver {
    fn list_devices(&self) -> Vec<PartialIdentifier> {
        let mut api = self.api.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = api.refresh_devices() {
            warn!(error = %e, "hid refresh failed");
        }
        let mut out: Vec<PartialIdentifier> = api
            .device_list()
            .filter(|info| info.vendor_id() == ELGATO_VENDOR_ID)
            .filter_map(|info| {
                let kind = Kind::from_pid(info.product_id())?;
                let serial = info.serial_number()?;
                Some(PartialIdentifier::new(serial, kind.description()))
            })
            .collect();
        // One physical deck may expose several interfaces.
        out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        out.dedup();
        out
    }

    fn describe(&self, device: &PartialIdentifier) -> Option<DeviceCapabilities> {
        Kind::from_description(&device.description).map(Kind::capabilities)
    }

    fn connect(&self, device: &PartialIdentifier) -> Result<DriverConnection, DeviceError> {
        let kind = Kind::from_description(&device.description)
            .ok_or_else(|| DeviceError::Unsupported(device.description.clone()))?;
        let handle = {
            let api = self.api.lock().unwrap_or_else(|e| e.into_inner());
            api.open_serial(ELGATO_VENDOR_ID, kind.pid(), &device.identifier)?
        };
        debug!(serial = %device.identifier, model = kind.description(), "stream deck opened");
        let shared = Arc::new(Mutex::new(handle));
        Ok(DriverConnection {
            capabilities: kind.capabilities(),
            source: Box::new(HidEventSource {
                device: shared.clone(),
                parser: ReportParser::new(kind),
                buf: vec![0; READ_BUFFER],
            }),
            writer: Arc::new(HidDisplayWriter {
                device: shared,
                kind,
            }),
        })
    }
}

/// `streamdeck-support` plugin carrying the `elgato-streamdeck` driver.
pub fn streamdeck_plugin() -> Result<PluginDefinition, DeviceError> {
    Ok(PluginBuilder::new(PLUGIN_NAME)
        .add_driver(DRIVER_NAME, StreamDeckDriver::new()?)
        .build())
}
