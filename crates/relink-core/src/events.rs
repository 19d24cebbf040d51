//! Event and listener traits.
//!
//! Anything published through a [`Notifier`](crate::Notifier) implements
//! [`Event`]; anything that wants to observe it implements [`EventListener`]
//! or is wrapped in a [`FnListener`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait for events published by relink components.
pub trait Event: Send + Sync + fmt::Debug {
    /// Returns the type of event (e.g., "connected", "connection_failed").
    fn event_type(&self) -> &'static str;

    /// Returns when this event occurred.
    fn timestamp(&self) -> Instant;

    /// Returns the name of the instance that emitted this event.
    fn source(&self) -> &str;
}

/// Trait for listening to events.
pub trait EventListener<E: Event>: Send + Sync {
    /// Called when an event is published.
    fn on_event(&self, event: &E);
}

/// Type alias for shared event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// A simple function-based event listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

impl<E, F> fmt::Debug for FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").finish_non_exhaustive()
    }
}
