//! Connection lifecycle notifications.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use relink_core::{Event, EventListener, Notifier, SubscriptionId};

use crate::error::Cause;

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, gauge};

#[cfg(feature = "metrics")]
static METRICS_INIT: std::sync::Once = std::sync::Once::new();

/// The transition a [`ConnectionEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    /// A connection was (re-)established.
    Connected,
    /// One attempt to open the connection failed.
    ConnectionFailed,
    /// An open connection was lost or closed.
    Disconnected,
}

impl ConnectionEventKind {
    /// Stable lowercase name, used for logs, metrics and [`Event::event_type`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEventKind::Connected => "connected",
            ConnectionEventKind::ConnectionFailed => "connection_failed",
            ConnectionEventKind::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable notification about a connection transition.
///
/// `attempt` is the failed-attempt count for `ConnectionFailed`, the number
/// of attempts the recovery took for `Connected`, and `0` for
/// `Disconnected`.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    kind: ConnectionEventKind,
    connector: Arc<str>,
    timestamp: Instant,
    attempt: u32,
    cause: Option<Cause>,
}

impl ConnectionEvent {
    /// What happened.
    pub fn kind(&self) -> ConnectionEventKind {
        self.kind
    }

    /// Name of the connector that emitted the event.
    pub fn connector(&self) -> &str {
        &self.connector
    }

    /// Attempt number associated with the transition.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The error behind a failure or disconnect, when known.
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Returns true if this is a `Connected` event.
    pub fn is_connected(&self) -> bool {
        self.kind == ConnectionEventKind::Connected
    }

    /// Returns true if this is a `ConnectionFailed` event.
    pub fn is_connection_failed(&self) -> bool {
        self.kind == ConnectionEventKind::ConnectionFailed
    }

    /// Returns true if this is a `Disconnected` event.
    pub fn is_disconnected(&self) -> bool {
        self.kind == ConnectionEventKind::Disconnected
    }
}

impl Event for ConnectionEvent {
    fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }

    fn timestamp(&self) -> Instant {
        self.timestamp
    }

    fn source(&self) -> &str {
        &self.connector
    }
}

/// Publishes connection events for one connector.
///
/// All emissions pass through a single gate, so observers see a total
/// order. Once shut down, nothing more is published and every subscription
/// is dropped.
pub struct ConnectionNotifier {
    name: Arc<str>,
    notifier: Notifier<ConnectionEvent>,
    shut_down: Mutex<bool>,
}

impl ConnectionNotifier {
    /// Creates a notifier for the connector with the given name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        #[cfg(feature = "metrics")]
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "relink_connect_attempts_total",
                "Total number of connection attempts by outcome"
            );
            describe_counter!(
                "relink_transitions_total",
                "Total number of transitions into connected or disconnected"
            );
            describe_counter!(
                "relink_recovery_exhausted_total",
                "Total number of reconnection episodes that gave up"
            );
            describe_gauge!(
                "relink_connected",
                "Whether the connector currently holds a connection (1) or not (0)"
            );
        });

        Self {
            name: name.into(),
            notifier: Notifier::new(),
            shut_down: Mutex::new(false),
        }
    }

    /// Name of the owning connector.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes a listener.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionId
    where
        L: EventListener<ConnectionEvent> + 'static,
    {
        self.notifier.subscribe(listener)
    }

    /// Subscribes a closure.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe_fn(f)
    }

    /// Removes a subscription. Returns `false` if it no longer exists.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Number of active subscriptions.
    pub fn subscribers(&self) -> usize {
        self.notifier.len()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn connected(&self, attempt: u32) -> bool {
        self.emit(ConnectionEventKind::Connected, attempt, None)
    }

    pub(crate) fn connection_failed(&self, attempt: u32, cause: Cause) -> bool {
        self.emit(ConnectionEventKind::ConnectionFailed, attempt, Some(cause))
    }

    pub(crate) fn disconnected(&self, cause: Option<Cause>) -> bool {
        self.emit(ConnectionEventKind::Disconnected, 0, cause)
    }

    /// Records that a recovery episode gave up. Not a published event.
    pub(crate) fn exhausted(&self, attempts: u32) {
        #[cfg(feature = "tracing")]
        tracing::error!(connector = %self.name, attempts, "reconnection attempts exhausted");

        #[cfg(feature = "metrics")]
        counter!("relink_recovery_exhausted_total", "connector" => self.name.to_string())
            .increment(1);

        #[cfg(not(any(feature = "tracing", feature = "metrics")))]
        let _ = attempts;
    }

    /// Publishes an optional final event, then closes the gate and drops
    /// every subscription. Later calls do nothing.
    pub(crate) fn shutdown(&self, final_event: Option<ConnectionEventKind>) {
        let mut shut_down = self.shut_down.lock().unwrap_or_else(PoisonError::into_inner);
        if *shut_down {
            return;
        }
        if let Some(kind) = final_event {
            self.publish(kind, 0, None);
        }
        *shut_down = true;
        self.notifier.clear();

        #[cfg(feature = "tracing")]
        tracing::debug!(connector = %self.name, "notifier shut down");
    }

    fn emit(&self, kind: ConnectionEventKind, attempt: u32, cause: Option<Cause>) -> bool {
        let shut_down = self.shut_down.lock().unwrap_or_else(PoisonError::into_inner);
        if *shut_down {
            return false;
        }
        self.publish(kind, attempt, cause);
        true
    }

    // Callers hold the gate.
    fn publish(&self, kind: ConnectionEventKind, attempt: u32, cause: Option<Cause>) {
        #[cfg(feature = "tracing")]
        match (kind, &cause) {
            (ConnectionEventKind::Connected, _) => {
                tracing::info!(connector = %self.name, attempt, "connection established");
            }
            (ConnectionEventKind::ConnectionFailed, Some(cause)) => {
                tracing::warn!(connector = %self.name, attempt, error = %cause, "connection attempt failed");
            }
            (ConnectionEventKind::ConnectionFailed, None) => {
                tracing::warn!(connector = %self.name, attempt, "connection attempt failed");
            }
            (ConnectionEventKind::Disconnected, Some(cause)) => {
                tracing::warn!(connector = %self.name, error = %cause, "connection lost");
            }
            (ConnectionEventKind::Disconnected, None) => {
                tracing::info!(connector = %self.name, "connection closed");
            }
        }

        #[cfg(feature = "metrics")]
        match kind {
            ConnectionEventKind::Connected => {
                counter!("relink_connect_attempts_total", "connector" => self.name.to_string(), "outcome" => "success").increment(1);
                counter!("relink_transitions_total", "connector" => self.name.to_string(), "to" => "connected").increment(1);
                gauge!("relink_connected", "connector" => self.name.to_string()).set(1.0);
            }
            ConnectionEventKind::ConnectionFailed => {
                counter!("relink_connect_attempts_total", "connector" => self.name.to_string(), "outcome" => "failure").increment(1);
            }
            ConnectionEventKind::Disconnected => {
                counter!("relink_transitions_total", "connector" => self.name.to_string(), "to" => "disconnected").increment(1);
                gauge!("relink_connected", "connector" => self.name.to_string()).set(0.0);
            }
        }

        let event = ConnectionEvent {
            kind,
            connector: Arc::clone(&self.name),
            timestamp: Instant::now(),
            attempt,
            cause,
        };
        self.notifier.publish(&event);
    }
}

impl fmt::Debug for ConnectionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionNotifier")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
