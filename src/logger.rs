use crate::event::InputEvent;
use crate::eventbus::InputListener;
use tracing::debug;

/// A listener that logs every input event through `tracing`.
pub struct TracingListener {
    device: String,
}

impl TracingListener {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl InputListener for TracingListener {
    fn on_input(&self, event: &InputEvent) {
        debug!(device = %self.device, input = event.input, kind = ?event.kind, "input event");
    }
}
