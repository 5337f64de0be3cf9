use crate::event::{InputEvent, InputKind};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Trait for reacting to events emitted by an input.
///
/// Listeners run on the device's reader thread (or, for delayed long-press
/// releases, on a runtime worker), so they must not block for long.
pub trait InputListener: Send + Sync {
    fn on_input(&self, event: &InputEvent);
}

impl<F> InputListener for F
where
    F: Fn(&InputEvent) + Send + Sync,
{
    fn on_input(&self, event: &InputEvent) {
        self(event)
    }
}

/// Determines which kinds of events a listener wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    All,
    /// Presses and releases, including touch presses on display segments.
    PressesOnly,
    TwistOnly,
    /// Touch presses, releases and drags on display segments.
    TouchOnly,
    Custom(fn(&InputEvent) -> bool),
}

impl EventFilter {
    pub fn accepts(&self, event: &InputEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::PressesOnly => event.kind.is_press() || event.kind.is_release(),
            EventFilter::TwistOnly => matches!(event.kind, InputKind::Twisted { .. }),
            EventFilter::TouchOnly => matches!(
                event.kind,
                InputKind::TouchPressed { .. }
                    | InputKind::TouchReleased { .. }
                    | InputKind::Dragged { .. }
            ),
            EventFilter::Custom(f) => f(event),
        }
    }
}

struct ListenerEntry {
    listener: Arc<dyn InputListener>,
    enabled: bool,
    filter: EventFilter,
}

/// Listener registry owned by a single input.
///
/// Listeners are delivered in registration order.
#[derive(Default)]
pub struct InputEventBus {
    next_id: u64,
    listeners: BTreeMap<u64, ListenerEntry>,
}

impl InputEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns its id.
    pub fn add_listener(&mut self, listener: Arc<dyn InputListener>, filter: EventFilter) -> u64 {
        let id = self.next_id;
        self.listeners.insert(
            id,
            ListenerEntry {
                listener,
                enabled: true,
                filter,
            },
        );
        self.next_id += 1;
        id
    }

    /// Enables a previously registered listener.
    pub fn enable(&mut self, id: u64) {
        if let Some(entry) = self.listeners.get_mut(&id) {
            entry.enabled = true;
        }
    }

    /// Disables (mutes) a listener without removing it.
    pub fn disable(&mut self, id: u64) {
        if let Some(entry) = self.listeners.get_mut(&id) {
            entry.enabled = false;
        }
    }

    /// Unregisters a listener entirely. Returns whether it existed.
    pub fn remove_listener(&mut self, id: u64) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Active listeners whose filter accepts `event`.
    ///
    /// Callers invoke the returned listeners after releasing whatever lock
    /// guards the bus, so a listener may add or remove listeners itself.
    pub fn matching(&self, event: &InputEvent) -> Vec<Arc<dyn InputListener>> {
        self.listeners
            .values()
            .filter(|entry| entry.enabled && entry.filter.accepts(event))
            .map(|entry| entry.listener.clone())
            .collect()
    }

    /// Emits one event to all active and matching listeners.
    pub fn emit(&self, event: &InputEvent) {
        for listener in self.matching(event) {
            listener.on_input(event);
        }
    }
}
