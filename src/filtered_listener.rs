use crate::event::InputEvent;
use crate::eventbus::InputListener;
use std::sync::Arc;

/// Wraps a listener and filters events based on a user-supplied predicate.
pub struct FilteredListener {
    predicate: Box<dyn Fn(&InputEvent) -> bool + Send + Sync>,
    inner: Arc<dyn InputListener>,
}

impl FilteredListener {
    pub fn new(
        predicate: impl Fn(&InputEvent) -> bool + Send + Sync + 'static,
        inner: Arc<dyn InputListener>,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            inner,
        }
    }
}

impl InputListener for FilteredListener {
    fn on_input(&self, event: &InputEvent) {
        if (self.predicate)(event) {
            self.inner.on_input(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InputKind;
    use std::sync::Mutex;

    #[test]
    fn test_predicate_gates_inner_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let inner: Arc<dyn InputListener> = Arc::new(move |e: &InputEvent| {
            sink.lock().unwrap().push(e.kind.clone());
        });
        let filtered = FilteredListener::new(|e| e.kind.is_release(), inner);

        filtered.on_input(&InputEvent::now(0, InputKind::Pressed));
        filtered.on_input(&InputEvent::now(0, InputKind::Released));

        assert_eq!(*seen.lock().unwrap(), vec![InputKind::Released]);
    }
}
