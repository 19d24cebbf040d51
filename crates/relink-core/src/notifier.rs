//! Ordered publish/subscribe registry.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::events::{BoxedEventListener, Event, EventListener, FnListener};

/// Handle returned by [`Notifier::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Returns the raw id. Ids are unique per notifier and never reused.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

struct Registry<E: Event> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, BoxedEventListener<E>)>,
}

/// Fans events out to subscribed listeners in registration order.
///
/// Clones share the same registry. Publishing is synchronous: a slow
/// listener delays every listener registered after it.
///
/// # Examples
///
/// ```
/// use relink_core::{Event, Notifier};
/// use std::time::Instant;
///
/// #[derive(Debug)]
/// struct Tick(Instant);
///
/// impl Event for Tick {
///     fn event_type(&self) -> &'static str { "tick" }
///     fn timestamp(&self) -> Instant { self.0 }
///     fn source(&self) -> &str { "clock" }
/// }
///
/// let notifier = Notifier::new();
/// let id = notifier.subscribe_fn(|tick: &Tick| println!("{:?}", tick));
/// notifier.publish(&Tick(Instant::now()));
/// assert!(notifier.unsubscribe(id));
/// ```
pub struct Notifier<E: Event> {
    registry: Arc<RwLock<Registry<E>>>,
}

impl<E: Event> Notifier<E> {
    /// Creates a notifier with no listeners.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Subscribes a listener. It receives every event published afterwards.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionId
    where
        L: EventListener<E> + 'static,
    {
        self.subscribe_arc(Arc::new(listener))
    }

    /// Subscribes an already shared listener.
    pub fn subscribe_arc(&self, listener: BoxedEventListener<E>) -> SubscriptionId {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((id, listener));
        id
    }

    /// Subscribes a closure.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
        E: 'static,
    {
        self.subscribe(FnListener::new(f))
    }

    /// Removes a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let before = registry.listeners.len();
        registry.listeners.retain(|(existing, _)| *existing != id);
        registry.listeners.len() != before
    }

    /// Removes every subscription.
    pub fn clear(&self) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .clear();
    }

    /// Publishes an event to all current listeners, in registration order.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside a callback; such changes apply to the next
    /// publish. A panicking listener is isolated and the remaining listeners
    /// still receive the event.
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<BoxedEventListener<E>> = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            #[cfg(feature = "tracing")]
            if outcome.is_err() {
                tracing::warn!(
                    event_type = event.event_type(),
                    source = event.source(),
                    "event listener panicked"
                );
            }
            #[cfg(not(feature = "tracing"))]
            let _ = outcome;
        }
    }

    /// Returns the number of subscriptions.
    pub fn len(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    /// Returns true if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Event> Clone for Notifier<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Event> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.len())
            .finish()
    }
}
