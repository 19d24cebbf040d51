//! Connection state tracking for reconnection logic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Connection state information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and healthy
    Connected,

    /// Disconnected, not currently trying to reconnect
    Disconnected,

    /// Currently attempting to reconnect
    Reconnecting,

    /// Reconnection gave up; waits for an explicit restart
    Failed,

    /// Shut down by `stop()`
    Stopped,
}

/// Shared reconnection state tracking.
///
/// Timestamps are stored as nanoseconds since the state was created, offset
/// by one so that zero means "never". They follow the tokio clock, so
/// paused-time tests see consistent elapsed values.
#[derive(Clone)]
pub struct ReconnectState {
    /// Current connection state, observable by waiters
    state: Arc<watch::Sender<ConnectionState>>,

    /// Failed attempts in the current episode
    attempts: Arc<AtomicU32>,

    origin: Instant,
    episode_started: Arc<AtomicU64>,
    last_failure: Arc<AtomicU64>,
    last_connected: Arc<AtomicU64>,
}

impl ReconnectState {
    /// Create a new reconnect state
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state: Arc::new(state),
            attempts: Arc::new(AtomicU32::new(0)),
            origin: Instant::now(),
            episode_started: Arc::new(AtomicU64::new(0)),
            last_failure: Arc::new(AtomicU64::new(0)),
            last_connected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Set the connection state, returning the previous one
    pub fn set_state(&self, state: ConnectionState) -> ConnectionState {
        self.state.send_replace(state)
    }

    /// Subscribe to state changes
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Get the number of failed attempts in the current episode
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Record a failed attempt and return the new count
    pub fn record_failure(&self) -> u32 {
        self.last_failure.store(self.now(), Ordering::Release);
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Reset attempts to zero
    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Release);
    }

    /// Mark connection as successful: attempts reset, episode closed
    pub fn mark_connected(&self) {
        self.reset_attempts();
        self.episode_started.store(0, Ordering::Release);
        self.last_connected.store(self.now(), Ordering::Release);
        self.set_state(ConnectionState::Connected);
    }

    /// Mark connection as lost, opening a new episode if none is running
    pub fn mark_disconnected(&self) {
        self.begin_episode();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Mark connection as reconnecting
    pub fn mark_reconnecting(&self) {
        self.begin_episode();
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Mark reconnection as given up
    pub fn mark_failed(&self) {
        self.set_state(ConnectionState::Failed);
    }

    /// Start a fresh episode after an explicit restart
    pub fn restart_episode(&self) {
        self.reset_attempts();
        self.episode_started.store(self.now(), Ordering::Release);
    }

    /// Time since the current outage began, zero when connected
    pub fn episode_elapsed(&self) -> Duration {
        self.since(&self.episode_started).unwrap_or(Duration::ZERO)
    }

    /// Time since the last failed attempt
    pub fn time_since_last_failure(&self) -> Option<Duration> {
        self.since(&self.last_failure)
    }

    /// Get time since last successful connection
    pub fn time_since_connected(&self) -> Option<Duration> {
        self.since(&self.last_connected)
    }

    fn begin_episode(&self) {
        let _ = self.episode_started.compare_exchange(
            0,
            self.now(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos())
            .unwrap_or(u64::MAX - 1)
            .saturating_add(1)
    }

    fn since(&self, stamp: &AtomicU64) -> Option<Duration> {
        match stamp.load(Ordering::Acquire) {
            0 => None,
            at => Some(Duration::from_nanos(self.now().saturating_sub(at))),
        }
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReconnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectState")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}
