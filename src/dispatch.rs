//! Input events → trigger → action.
//!
//! [`ItemBinding`] is the listener that connects a screen item to the input
//! it is shown on. For every event it checks each of the item's trigger
//! bindings and invokes the bound action when the trigger fires.

use crate::action::{ActionPayload, PluginAction, Trigger};
use crate::error::ActionError;
use crate::event::InputEvent;
use crate::eventbus::InputListener;
use crate::filtered_listener::FilteredListener;
use crate::registry::{NamespacedName, Registry};
use crate::screen::ScreenItem;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Invoke a registered action by name.
///
/// `None` if the action is not registered.
pub fn invoke_action(
    registry: &Registry,
    action: &NamespacedName,
    payload: &ActionPayload,
) -> Option<Result<(), ActionError>> {
    let action = registry.specific::<dyn PluginAction>(action)?;
    Some(action.instance.invoke(payload))
}

/// Run every binding of `item` whose trigger fires on `event`.
///
/// Returns the outcome per invoked action. Bindings whose trigger or action
/// no longer resolves are skipped.
pub fn dispatch_event(
    registry: &Registry,
    item: &ScreenItem,
    event: &InputEvent,
) -> Vec<(NamespacedName, Result<(), ActionError>)> {
    let mut outcomes = Vec::new();
    for binding in item.triggers() {
        let Some(trigger) = registry.specific::<dyn Trigger>(&binding.trigger) else {
            debug!(trigger = %binding.trigger, "trigger not registered");
            continue;
        };
        if !trigger.instance.fires_on(event) {
            continue;
        }
        match invoke_action(registry, &binding.action, &binding.data) {
            Some(result) => outcomes.push((binding.action.clone(), result)),
            None => debug!(action = %binding.action, "action not registered"),
        }
    }
    outcomes
}

/// Listener running a screen item's triggers.
pub struct ItemBinding {
    registry: Arc<Registry>,
    item: Arc<RwLock<ScreenItem>>,
}

impl ItemBinding {
    pub fn new(registry: Arc<Registry>, item: Arc<RwLock<ScreenItem>>) -> Self {
        Self { registry, item }
    }

    pub fn item(&self) -> &Arc<RwLock<ScreenItem>> {
        &self.item
    }

    /// Listener to register on a bus that may carry events of several
    /// inputs. A screenless item attached to an input only sees that input's
    /// events; the attachment is read per event, so re-attaching takes effect
    /// without re-registering.
    pub fn into_listener(self) -> Arc<dyn InputListener> {
        let item = self.item.clone();
        let attached = move |event: &InputEvent| {
            match &*item.read().unwrap_or_else(|e| e.into_inner()) {
                ScreenItem::Screenless(s) => s.input.map_or(true, |input| input == event.input),
                ScreenItem::Renderable(_) => true,
            }
        };
        Arc::new(FilteredListener::new(attached, Arc::new(self)))
    }
}

impl InputListener for ItemBinding {
    fn on_input(&self, event: &InputEvent) {
        // Clone out so actions never run under the item lock.
        let item = self.item.read().unwrap_or_else(|e| e.into_inner()).clone();
        for (action, result) in dispatch_event(&self.registry, &item, event) {
            match result {
                Ok(()) => debug!(input = event.input, %action, "action ran"),
                Err(e @ ActionError::TypeMismatch { .. }) => {
                    warn!(input = event.input, %action, error = %e, "action misconfigured")
                }
                Err(e) => warn!(input = event.input, %action, error = %e, "action failed"),
            }
        }
    }
}
