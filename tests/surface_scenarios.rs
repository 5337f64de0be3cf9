//! End-to-end scenarios over the virtual surface.

use async_trait::async_trait;
use deckhand::backends::virtual_surface::{RecordingWriter, VirtualSurface};
use deckhand::eventbus::{EventFilter, InputListener};
use deckhand::plugin::{core_plugin, LoadedPlugin, CORE_PLUGIN};
use deckhand::render::builtin::ButtonSettings;
use deckhand::render::{RenderOutcome, RendererSettings};
use deckhand::screen::RenderableItem;
use deckhand::{
    CoreConfig, Device, DeviceCapabilities, DeviceIdentifier, InputDisplay, InputEvent, InputKind,
    InputType, LifecycleBroadcaster, NamespacedName, PartialIdentifier, Plugin, PluginError,
    Registry, RenderPipeline, ScreenItem,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

fn grid_with_encoder() -> DeviceCapabilities {
    DeviceCapabilities {
        key_count: 6,
        rows: 2,
        columns: 3,
        encoder_count: 1,
        strip_size: None,
        key_resolution: (72, 72),
    }
}

fn grid_with_strip() -> DeviceCapabilities {
    DeviceCapabilities {
        strip_size: Some((800, 100)),
        encoder_count: 0,
        ..grid_with_encoder()
    }
}

fn grid_with_strip_and_encoders() -> DeviceCapabilities {
    DeviceCapabilities {
        encoder_count: 2,
        ..grid_with_strip()
    }
}

fn identifier() -> DeviceIdentifier {
    PartialIdentifier::new("SCN-1", "Scenario Deck").complete(NamespacedName::new("core", "virtual"))
}

type Seen = Arc<Mutex<Vec<(Instant, u16, InputKind)>>>;

fn observe(device: &Device) -> Seen {
    let seen: Seen = Arc::default();
    for input in device.inputs() {
        let sink = seen.clone();
        let listener: Arc<dyn InputListener> = Arc::new(move |e: &InputEvent| {
            sink.lock().unwrap().push((Instant::now(), e.input, e.kind.clone()));
        });
        input.add_listener(listener, EventFilter::All);
    }
    seen
}

async fn wait_for(seen: &Seen, n: usize, within: Duration) {
    let deadline = Instant::now() + within;
    while seen.lock().unwrap().len() < n && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_grid_with_encoder_layout() {
    let (_surface, connection) = VirtualSurface::new(grid_with_encoder());
    let device = Device::new(identifier(), connection, &CoreConfig::default(), Handle::current());

    let layout = device.describe();
    assert_eq!(layout.len(), 7);
    for desc in &layout[..6] {
        assert_eq!(desc.ty, InputType::Button);
        assert_eq!(desc.resolution, Some((72, 72)));
    }
    assert_eq!(layout[6].ty, InputType::Encoder);
    assert_eq!(layout[6].resolution, None);

    for i in 0..6 {
        let display = device.input(i).unwrap().display().unwrap();
        assert_eq!(display.display_resolution(), (72, 72));
    }
    assert!(device.input(6).unwrap().display().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_swipe_reaches_strip() {
    let (surface, connection) = VirtualSurface::new(grid_with_strip());
    let device = Device::new(identifier(), connection, &CoreConfig::default(), Handle::current());
    let seen = observe(&device);
    device.start().unwrap();

    surface.swipe((1, 2), (300, 50));
    wait_for(&seen, 1, Duration::from_secs(2)).await;

    let kinds: Vec<(u16, InputKind)> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|(_, i, k)| (*i, k.clone()))
        .collect();
    assert_eq!(
        kinds,
        vec![(
            6,
            InputKind::Dragged {
                from: (1, 2),
                to: (300, 50)
            }
        )]
    );
    assert_eq!(device.snapshot().get(6).unwrap().last_touch, Some((300, 50)));
    device.dispose();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_encoder_press_and_release_follow_the_strip() {
    let (surface, connection) = VirtualSurface::new(grid_with_strip_and_encoders());
    let device = Device::new(identifier(), connection, &CoreConfig::default(), Handle::current());
    let seen = observe(&device);
    device.start().unwrap();

    surface.press_encoder(0);
    assert!(wait_until_pressed(&device, 7).await);
    surface.release_encoder(0);
    surface.press_encoder(9);
    surface.release_encoder(9);
    surface.press_encoder(1);
    wait_for(&seen, 3, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let kinds: Vec<(u16, InputKind)> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|(_, i, k)| (*i, k.clone()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (7, InputKind::Pressed),
            (7, InputKind::Released),
            (8, InputKind::Pressed),
        ]
    );
    let snapshot = device.snapshot();
    assert!(!snapshot.is_pressed(7));
    assert!(snapshot.is_pressed(8));
    assert!(device.is_alive());
    device.dispose();
}

async fn wait_until_pressed(device: &Device, input: u16) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if device.snapshot().is_pressed(input) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn test_long_press_releases_later_without_blocking_reader() {
    let (surface, connection) = VirtualSurface::new(grid_with_strip());
    let device = Device::new(identifier(), connection, &CoreConfig::default(), Handle::current());
    let seen = observe(&device);
    device.start().unwrap();

    let started = Instant::now();
    surface.long_press(10, 20);
    surface.press_button(2);
    surface.release_button(2);
    wait_for(&seen, 4, Duration::from_secs(3)).await;

    let seen = seen.lock().unwrap().clone();
    let kinds: Vec<(u16, InputKind)> = seen.iter().map(|(_, i, k)| (*i, k.clone())).collect();
    let touch = |release: bool| {
        let (position, quadrant) = ((10, 20), 0);
        if release {
            InputKind::TouchReleased { position, quadrant }
        } else {
            InputKind::TouchPressed { position, quadrant }
        }
    };
    assert_eq!(
        kinds,
        vec![
            (6, touch(false)),
            (2, InputKind::Pressed),
            (2, InputKind::Released),
            (6, touch(true)),
        ]
    );
    assert!(seen[0].0 - started < Duration::from_millis(500));
    let held = seen[3].0 - seen[0].0;
    assert!(held >= Duration::from_millis(900), "released after {held:?}");
    device.dispose();
}

#[tokio::test]
async fn test_render_cache_hit_and_miss() {
    let mut builder = Registry::builder();
    builder.add_plugin(core_plugin()).unwrap();
    let registry = Arc::new(builder.build());

    let writer = Arc::new(RecordingWriter::default());
    let (_surface, connection) = VirtualSurface::with_writer(grid_with_encoder(), writer.clone());
    let device = Device::new(identifier(), connection, &CoreConfig::default(), Handle::current());
    let pipeline = RenderPipeline::new(registry.clone());

    let mut renderable = RenderableItem::default();
    assert!(renderable.set_renderer(&registry, NamespacedName::new(CORE_PLUGIN, "button")));
    let mut item = ScreenItem::Renderable(renderable);
    let key = device.input(0).unwrap();

    let first = pipeline.render(&mut item, key).await.unwrap();
    assert!(matches!(first, RenderOutcome::Uploaded { .. }));
    let second = pipeline.render(&mut item, key).await.unwrap();
    assert!(matches!(second, RenderOutcome::Cached { .. }));
    assert_eq!(writer.uploads().len(), 1);

    if let ScreenItem::Renderable(r) = &mut item {
        r.settings = Some(
            RendererSettings::of(&ButtonSettings::solid([0, 0, 0, 255])).unwrap(),
        );
    }
    let third = pipeline.render(&mut item, key).await.unwrap();
    assert!(matches!(third, RenderOutcome::Uploaded { .. }));
    assert_eq!(writer.uploads().len(), 2);

    let encoder = device.input(6).unwrap();
    assert_eq!(
        pipeline.render(&mut item, encoder).await.unwrap(),
        RenderOutcome::NotDisplayable
    );
}

struct Counting {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl Plugin for Counting {
    async fn device_connected(&self, _device: &DeviceIdentifier) -> Result<(), PluginError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(PluginError::Failed("not today".into()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_broadcast_collects_failures_after_all_handlers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let plugins: Vec<LoadedPlugin> = ["first", "grumpy", "last"]
        .into_iter()
        .map(|name| LoadedPlugin {
            name: name.to_string(),
            instance: Arc::new(Counting {
                calls: calls.clone(),
                fail: name == "grumpy",
            }),
        })
        .collect();

    let err = LifecycleBroadcaster::new(plugins)
        .device_connected(&identifier())
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].0, "grumpy");
}
