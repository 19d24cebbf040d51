use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use relink_core::{EventListener, SubscriptionId};
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ReconnectConfig, WhileRecovering};
use crate::error::{ConnectorError, ErrorSnapshot, FatalConnectError};
use crate::events::{ConnectionEvent, ConnectionEventKind, ConnectionNotifier};
use crate::handle::{Connection, ConnectionFactory, ConnectionHandle};
use crate::state::{ConnectionState, ReconnectState};
use crate::strategy::{self, Recovery, RecoveryError, ReconnectionStrategy};

/// Error type of the operations run on a factory's connections.
pub type OperationError<F> = <<F as ConnectionFactory>::Connection as Connection>::Error;

type Slot<C> = Option<ConnectionHandle<C>>;

/// Owns one logical connection and keeps it alive across outages.
///
/// Cloning is cheap; all clones share the same connection, state and
/// observers. Call [`stop`](Self::stop) to release the connection and end
/// background recovery.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use relink_connector::{Connection, ManagedConnector, ReconnectConfig, RetryPolicy};
///
/// struct Session;
///
/// impl Connection for Session {
///     type Error = std::io::Error;
///
///     async fn is_valid(&mut self) -> bool {
///         true
///     }
///
///     async fn close(&mut self) {}
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let connector = ManagedConnector::new(
///     || async { Ok::<_, std::io::Error>(Session) },
///     ReconnectConfig::builder()
///         .name("session")
///         .policy(RetryPolicy::fixed(Duration::from_millis(500), 3))
///         .build(),
/// );
///
/// connector.start().await.unwrap();
/// let answer = connector
///     .execute(|_session| Box::pin(async { Ok(42) }))
///     .await
///     .unwrap();
/// assert_eq!(answer, 42);
/// connector.stop().await;
/// # }
/// ```
pub struct ManagedConnector<F: ConnectionFactory> {
    inner: Arc<Inner<F>>,
}

struct Inner<F: ConnectionFactory> {
    factory: F,
    config: ReconnectConfig,

    /// Held for the whole of each operation and of blocking recovery.
    slot: tokio::sync::Mutex<Slot<F::Connection>>,

    state: ReconnectState,
    notifier: ConnectionNotifier,
    cancel: CancellationToken,

    recovery: Mutex<Option<JoinHandle<()>>>,
    /// Set while a background recovery task owns the retry loop.
    recovering: AtomicBool,

    fatal: Mutex<Option<FatalConnectError>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<F: ConnectionFactory> Clone for ManagedConnector<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for ManagedConnector<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnector")
            .field("name", &self.inner.config.name)
            .field("state", &self.inner.state.state())
            .field("attempts", &self.inner.state.attempts())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<F: ConnectionFactory> ManagedConnector<F> {
    /// Creates a connector. Nothing is opened until [`start`](Self::start).
    pub fn new(factory: F, config: ReconnectConfig) -> Self {
        let notifier = ConnectionNotifier::new(config.name.as_str());
        Self {
            inner: Arc::new(Inner {
                factory,
                config,
                slot: tokio::sync::Mutex::new(None),
                state: ReconnectState::new(),
                notifier,
                cancel: CancellationToken::new(),
                recovery: Mutex::new(None),
                recovering: AtomicBool::new(false),
                fatal: Mutex::new(None),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Opens the first connection.
    ///
    /// Blocking connectors run the whole retry loop before returning.
    /// Non-blocking connectors make one attempt and, if it fails, hand the
    /// loop to a background task and return `Ok` in state `Reconnecting`.
    ///
    /// Calling `start` while connected does nothing. Calling it after the
    /// retry budget was spent begins a fresh episode.
    pub async fn start(&self) -> Result<(), ConnectorError<OperationError<F>>> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::Acquire) {
            return Err(ConnectorError::Stopped);
        }
        inner
            .config
            .policy
            .validate()
            .map_err(FatalConnectError::from)?;

        let mut slot = inner.slot.lock().await;
        if inner.stopped.load(Ordering::Acquire) {
            return Err(ConnectorError::Stopped);
        }
        inner.started.store(true, Ordering::Release);

        if slot.as_ref().is_some_and(ConnectionHandle::is_open)
            || inner.recovering.load(Ordering::Acquire)
        {
            return Ok(());
        }

        if inner.state.state() == ConnectionState::Failed {
            #[cfg(feature = "tracing")]
            tracing::info!(connector = %inner.config.name, "restarting after exhausted reconnection");

            inner.clear_fatal();
            inner.state.restart_episode();
        }

        match inner.config.strategy {
            ReconnectionStrategy::Blocking => inner.recover_inline(&mut slot).await,
            ReconnectionStrategy::NonBlocking => inner.connect_once(&mut slot).await,
        }
    }

    /// Runs `op` against the live connection.
    ///
    /// If the connection is down, blocking connectors recover first and
    /// non-blocking connectors return [`ConnectorError::Unavailable`] (or
    /// wait, per [`WhileRecovering`]). An error from `op` counts as lost
    /// connectivity when the configured predicate matches it or the
    /// liveness probe fails. Lost connectivity triggers recovery and, unless
    /// disabled, a single retry of `op`. Any other error is returned as
    /// [`ConnectorError::Operation`].
    pub async fn execute<T, Op>(&self, mut op: Op) -> Result<T, ConnectorError<OperationError<F>>>
    where
        Op: for<'c> FnMut(&'c mut F::Connection) -> BoxFuture<'c, Result<T, OperationError<F>>>,
    {
        let inner = &self.inner;
        let mut deadline = None;

        let mut slot = inner.acquire(&mut deadline).await?;
        let error = match inner.invoke(&mut slot, &mut op).await? {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !inner.is_connection_failure(&mut slot, &error).await {
            return Err(ConnectorError::Operation(error));
        }
        inner.lose_connection(&mut slot, &error).await;
        drop(slot);

        if !inner.config.retry_on_reconnect {
            match inner.config.strategy {
                ReconnectionStrategy::Blocking => {
                    drop(inner.acquire(&mut deadline).await?);
                }
                ReconnectionStrategy::NonBlocking => inner.ensure_recovery(),
            }
            return Err(ConnectorError::ConnectionLost(error));
        }

        let mut slot = match inner.acquire(&mut deadline).await {
            Ok(slot) => slot,
            Err(ConnectorError::Unavailable { .. }) => {
                return Err(ConnectorError::ConnectionLost(error));
            }
            Err(other) => return Err(other),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(connector = %inner.config.name, "retrying operation on new connection");

        match inner.invoke(&mut slot, &mut op).await? {
            Ok(value) => Ok(value),
            Err(retry_error) => {
                if !inner.is_connection_failure(&mut slot, &retry_error).await {
                    return Err(ConnectorError::Operation(retry_error));
                }
                inner.lose_connection(&mut slot, &retry_error).await;
                drop(slot);
                if !inner.config.strategy.is_blocking() {
                    inner.ensure_recovery();
                }
                Err(ConnectorError::ConnectionLost(retry_error))
            }
        }
    }

    /// Shuts the connector down.
    ///
    /// Cancels background recovery and waits for it, closes the connection,
    /// publishes one DISCONNECTED if a connection was open and then drops
    /// every subscription. Safe to call more than once.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.cancel.cancel();

        let task = inner
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let mut slot = inner.slot.lock().await;
        let was_open = match slot.take() {
            Some(mut handle) => {
                let open = handle.is_open();
                handle.close().await;
                open
            }
            None => false,
        };
        inner.state.set_state(ConnectionState::Stopped);
        inner
            .notifier
            .shutdown(was_open.then_some(ConnectionEventKind::Disconnected));
        drop(slot);

        #[cfg(feature = "tracing")]
        tracing::debug!(connector = %inner.config.name, "connector stopped");
    }

    /// Subscribes a listener to connection events.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionId
    where
        L: EventListener<ConnectionEvent> + 'static,
    {
        self.inner.notifier.subscribe(listener)
    }

    /// Subscribes a closure to connection events.
    ///
    /// Listeners run synchronously in emission order and must not call back
    /// into the connector.
    pub fn subscribe_fn<L>(&self, listener: L) -> SubscriptionId
    where
        L: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe_fn(listener)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Connector name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The configuration this connector was built with.
    pub fn config(&self) -> &ReconnectConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.state()
    }

    /// Failed attempts in the current outage.
    ///
    /// Already reset to 0 when CONNECTED is published.
    pub fn attempts(&self) -> u32 {
        self.inner.state.attempts()
    }

    /// Returns true while a connection is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// The error that ended the last episode, while the connector is failed.
    pub fn last_error(&self) -> Option<FatalConnectError> {
        self.inner.stored_fatal()
    }

    /// Shared state record, for watching transitions.
    pub fn reconnect_state(&self) -> &ReconnectState {
        &self.inner.state
    }
}

impl<F: ConnectionFactory> Inner<F> {
    fn recovery(&self) -> Recovery<'_, F> {
        Recovery {
            factory: &self.factory,
            policy: &self.config.policy,
            state: &self.state,
            notifier: &self.notifier,
            cancel: &self.cancel,
        }
    }

    fn check_usable(&self) -> Result<(), ConnectorError<OperationError<F>>> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ConnectorError::Stopped);
        }
        if !self.started.load(Ordering::Acquire) {
            return Err(ConnectorError::NotStarted);
        }
        match self.stored_fatal() {
            Some(fatal) => Err(ConnectorError::Fatal(fatal)),
            None => Ok(()),
        }
    }

    /// Locks the slot once it holds a usable connection.
    async fn acquire(
        self: &Arc<Self>,
        deadline: &mut Option<Instant>,
    ) -> Result<MutexGuard<'_, Slot<F::Connection>>, ConnectorError<OperationError<F>>> {
        loop {
            self.check_usable()?;
            let mut slot = self.slot.lock().await;
            self.check_usable()?;

            let usable = match slot.as_mut() {
                Some(handle) if handle.is_open() => {
                    !self.config.validate_before_use || handle.is_valid().await
                }
                _ => false,
            };
            if usable {
                return Ok(slot);
            }
            self.drop_handle(&mut slot, None).await;

            match self.config.strategy {
                ReconnectionStrategy::Blocking => {
                    self.recover_inline(&mut slot).await?;
                    return Ok(slot);
                }
                ReconnectionStrategy::NonBlocking => {
                    self.ensure_recovery();
                    // The loop may have given up between the checks above and here
                    self.check_usable()?;
                    let attempt = self.state.attempts();
                    let WhileRecovering::WaitFor(bound) = self.config.while_recovering else {
                        return Err(ConnectorError::Unavailable { attempt });
                    };
                    drop(slot);

                    let deadline = *deadline.get_or_insert_with(|| Instant::now() + bound);
                    if !self.wait_for_recovery(deadline).await {
                        return Err(ConnectorError::Unavailable {
                            attempt: self.state.attempts(),
                        });
                    }
                }
            }
        }
    }

    async fn invoke<T, Op>(
        &self,
        slot: &mut Slot<F::Connection>,
        op: &mut Op,
    ) -> Result<Result<T, OperationError<F>>, ConnectorError<OperationError<F>>>
    where
        Op: for<'c> FnMut(&'c mut F::Connection) -> BoxFuture<'c, Result<T, OperationError<F>>>,
    {
        match slot.as_mut().and_then(ConnectionHandle::connection_mut) {
            Some(connection) => Ok(op(connection).await),
            None => Err(ConnectorError::Unavailable {
                attempt: self.state.attempts(),
            }),
        }
    }

    async fn is_connection_failure(
        &self,
        slot: &mut Slot<F::Connection>,
        error: &OperationError<F>,
    ) -> bool {
        if self.config.is_connection_error(error) == Some(true) {
            return true;
        }
        match slot.as_mut() {
            Some(handle) => !handle.is_valid().await,
            None => true,
        }
    }

    async fn lose_connection(&self, slot: &mut Slot<F::Connection>, error: &OperationError<F>) {
        self.drop_handle(slot, Some(error)).await;
    }

    /// Closes whatever the slot holds and reports the disconnect.
    async fn drop_handle(
        &self,
        slot: &mut Slot<F::Connection>,
        error: Option<&OperationError<F>>,
    ) {
        let Some(mut handle) = slot.take() else {
            return;
        };
        handle.mark_broken();
        handle.close().await;
        self.state.mark_disconnected();
        let cause = error.map(|e| Arc::new(ErrorSnapshot::of(e)) as crate::error::Cause);
        self.notifier.disconnected(cause);
    }

    /// Runs the retry loop on the calling task, holding the slot.
    async fn recover_inline(
        &self,
        slot: &mut Slot<F::Connection>,
    ) -> Result<(), ConnectorError<OperationError<F>>> {
        match self.recovery().run().await {
            Ok((handle, attempts)) => {
                self.install(slot, handle, attempts);
                Ok(())
            }
            Err(RecoveryError::Exhausted(fatal)) => Err(ConnectorError::Fatal(self.fail(fatal))),
            Err(RecoveryError::Cancelled) => Err(ConnectorError::Stopped),
        }
    }

    /// One attempt; on failure the background task takes over.
    async fn connect_once(
        self: &Arc<Self>,
        slot: &mut Slot<F::Connection>,
    ) -> Result<(), ConnectorError<OperationError<F>>> {
        self.state.mark_reconnecting();
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ConnectorError::Stopped),
            result = ConnectionHandle::open(&self.factory) => result,
        };

        match opened {
            Ok(handle) => {
                let attempts = self.state.attempts() + 1;
                self.install(slot, handle, attempts);
                Ok(())
            }
            Err(err) => {
                let cause = err.cause().clone();
                let failures = self.state.record_failure();
                self.notifier.connection_failed(failures, cause.clone());

                if strategy::exhausted(&self.config.policy, &self.state, failures) {
                    let fatal = FatalConnectError::Exhausted {
                        attempts: failures,
                        cause,
                    };
                    return Err(ConnectorError::Fatal(self.fail(fatal)));
                }
                self.ensure_recovery();
                Ok(())
            }
        }
    }

    /// Starts the background loop unless one is already running or the
    /// episode has already been given up.
    ///
    /// The task handle is stored under the `recovery` lock before the lock
    /// is released, so `stop()` always awaits the live task.
    fn ensure_recovery(self: &Arc<Self>) {
        let mut task = self.recovery.lock().unwrap_or_else(PoisonError::into_inner);
        if self.recovering.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.cancel.is_cancelled()
            || self.stored_fatal().is_some()
            || strategy::exhausted(&self.config.policy, &self.state, self.state.attempts())
        {
            self.recovering.store(false, Ordering::Release);
            return;
        }
        self.state.mark_reconnecting();

        #[cfg(feature = "tracing")]
        tracing::debug!(connector = %self.config.name, "starting background reconnection");

        let inner = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            inner.recover_in_background().await
        }));
    }

    async fn recover_in_background(self: Arc<Self>) {
        match self.recovery().run().await {
            Ok((mut handle, attempts)) => {
                let mut slot = self.slot.lock().await;
                self.recovering.store(false, Ordering::Release);
                if self.cancel.is_cancelled() {
                    drop(slot);
                    handle.close().await;
                    return;
                }
                self.install(&mut slot, handle, attempts);
            }
            Err(RecoveryError::Exhausted(fatal)) => {
                // The fatal error must be visible before the flag drops
                self.fail(fatal);
                self.recovering.store(false, Ordering::Release);
            }
            Err(RecoveryError::Cancelled) => {
                self.recovering.store(false, Ordering::Release);
            }
        }
    }

    /// Puts a fresh handle in the slot, then announces it.
    ///
    /// The attempt counter is reset before CONNECTED goes out: listeners
    /// reading [`ManagedConnector::attempts`] see 0 and should use the
    /// event's own `attempt` for the episode's count.
    fn install(
        &self,
        slot: &mut Slot<F::Connection>,
        handle: ConnectionHandle<F::Connection>,
        attempts: u32,
    ) {
        *slot = Some(handle);
        self.state.mark_connected();
        self.notifier.connected(attempts);
    }

    /// Records an exhausted episode. The error is stored before the state
    /// flips, so anyone woken by `Failed` finds it.
    fn fail(&self, fatal: FatalConnectError) -> FatalConnectError {
        *self.fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(fatal.clone());
        self.state.mark_failed();
        if let FatalConnectError::Exhausted { attempts, .. } = &fatal {
            self.notifier.exhausted(*attempts);
        }
        fatal
    }

    fn stored_fatal(&self) -> Option<FatalConnectError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear_fatal(&self) {
        self.fatal.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Waits until recovery ends either way. Returns false on timeout.
    async fn wait_for_recovery(&self, deadline: Instant) -> bool {
        let mut rx = self.state.watch();
        let settled = async move {
            rx.wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Connected | ConnectionState::Failed | ConnectionState::Stopped
                )
            })
            .await
            .is_ok()
        };
        tokio::time::timeout_at(deadline, settled)
            .await
            .unwrap_or(false)
    }
}
