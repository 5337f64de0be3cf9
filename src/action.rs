//! Plugin actions and triggers.
//!
//! An action is what runs when a trigger fires on an input. Actions come in
//! two flavors:
//! - **untyped**: implement [`PluginAction`] directly and inspect the
//!   [`ActionPayload`] yourself;
//! - **typed**: implement [`TypedAction`] and register it through
//!   [`Typed`], which checks the payload's runtime type before delegating.
//!
//! A type mismatch is a configuration error. It is reported with both type
//! names and never retried.

use crate::error::ActionError;
use crate::event::InputEvent;
use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

/// Type-erased action data.
#[derive(Clone)]
pub struct ActionPayload {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl ActionPayload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// The empty payload untyped actions default to.
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Rust type name of the carried value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }
}

impl fmt::Debug for ActionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionPayload")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Type-erased action, as stored in the registry.
pub trait PluginAction: Send + Sync {
    /// Payload type this action requires, or `None` if it takes anything.
    fn data_type(&self) -> Option<&'static str> {
        None
    }

    /// Payload to seed a fresh trigger binding with.
    fn default_data(&self) -> ActionPayload {
        ActionPayload::empty()
    }

    fn invoke(&self, payload: &ActionPayload) -> Result<(), ActionError>;
}

/// Action with a statically known payload type.
pub trait TypedAction: Send + Sync + 'static {
    type Data: Any + Send + Sync + Default;

    fn run(&self, data: &Self::Data) -> Result<(), ActionError>;

    fn default_data(&self) -> Self::Data {
        Self::Data::default()
    }
}

/// Adapter exposing a [`TypedAction`] as a [`PluginAction`].
pub struct Typed<A>(pub A);

impl<A: TypedAction> Typed<A> {
    pub fn inner(&self) -> &A {
        &self.0
    }
}

impl<A: TypedAction> PluginAction for Typed<A> {
    fn data_type(&self) -> Option<&'static str> {
        Some(any::type_name::<A::Data>())
    }

    fn default_data(&self) -> ActionPayload {
        ActionPayload::new(self.0.default_data())
    }

    fn invoke(&self, payload: &ActionPayload) -> Result<(), ActionError> {
        let data = payload
            .downcast_ref::<A::Data>()
            .ok_or(ActionError::TypeMismatch {
                expected: any::type_name::<A::Data>(),
                actual: payload.type_name(),
            })?;
        self.0.run(data)
    }
}

/// Untyped action backed by a closure.
pub struct FnAction<F> {
    run: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ActionPayload) -> Result<(), ActionError> + Send + Sync,
{
    pub fn new(run: F) -> Self {
        Self { run }
    }
}

impl<F> PluginAction for FnAction<F>
where
    F: Fn(&ActionPayload) -> Result<(), ActionError> + Send + Sync,
{
    fn invoke(&self, payload: &ActionPayload) -> Result<(), ActionError> {
        (self.run)(payload)
    }
}

/// Decides whether an input event fires the actions bound to it.
pub trait Trigger: Send + Sync {
    fn fires_on(&self, event: &InputEvent) -> bool;
}

/// Triggers every device understands.
pub mod builtin {
    use super::Trigger;
    use crate::event::{InputEvent, InputKind};

    /// Fires on button, encoder and touch presses.
    pub struct PressTrigger;

    impl Trigger for PressTrigger {
        fn fires_on(&self, event: &InputEvent) -> bool {
            event.kind.is_press()
        }
    }

    /// Fires on releases, including the synthesized release of a tap.
    pub struct ReleaseTrigger;

    impl Trigger for ReleaseTrigger {
        fn fires_on(&self, event: &InputEvent) -> bool {
            event.kind.is_release()
        }
    }

    /// Fires on any encoder rotation.
    pub struct TwistTrigger;

    impl Trigger for TwistTrigger {
        fn fires_on(&self, event: &InputEvent) -> bool {
            matches!(event.kind, InputKind::Twisted { .. })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::builtin::*;
    use super::*;
    use crate::event::InputKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Brightness {
        last: AtomicU32,
    }

    #[derive(Default)]
    struct Level(u32);

    impl TypedAction for Brightness {
        type Data = Level;

        fn run(&self, data: &Level) -> Result<(), ActionError> {
            self.last.store(data.0, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_typed_action_delegates_on_matching_payload() {
        let action = Typed(Brightness::default());
        action.invoke(&ActionPayload::new(Level(70))).unwrap();
        assert_eq!(action.inner().last.load(Ordering::SeqCst), 70);
    }

    #[test]
    fn test_typed_action_rejects_wrong_payload() {
        let action = Typed(Brightness::default());
        let err = action
            .invoke(&ActionPayload::new(String::from("70")))
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::TypeMismatch {
                expected: any::type_name::<Level>(),
                actual: any::type_name::<String>(),
            }
        );
        assert_eq!(action.inner().last.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_default_data_is_default_constructed() {
        let action = Typed(Brightness::default());
        let payload = action.default_data();
        assert_eq!(payload.downcast_ref::<Level>().map(|l| l.0), Some(0));
        assert_eq!(action.data_type(), Some(any::type_name::<Level>()));
    }

    #[test]
    fn test_untyped_action_accepts_anything() {
        let action = FnAction::new(|p: &ActionPayload| {
            if p.is::<()>() {
                Ok(())
            } else {
                Err(ActionError::Failed(format!("got {}", p.type_name())))
            }
        });
        assert_eq!(action.data_type(), None);
        assert!(action.invoke(&action.default_data()).is_ok());
        assert!(matches!(
            action.invoke(&ActionPayload::new(5u8)),
            Err(ActionError::Failed(_))
        ));
    }

    #[test]
    fn test_builtin_triggers() {
        let press = InputEvent::now(0, InputKind::Pressed);
        let tap_release = InputEvent::now(
            8,
            InputKind::TouchReleased {
                position: (1, 1),
                quadrant: 0,
            },
        );
        let twist = InputEvent::now(9, InputKind::Twisted { delta: 1 });

        assert!(PressTrigger.fires_on(&press));
        assert!(!PressTrigger.fires_on(&twist));
        assert!(ReleaseTrigger.fires_on(&tap_release));
        assert!(TwistTrigger.fires_on(&twist));
        assert!(!TwistTrigger.fires_on(&press));
    }
}
