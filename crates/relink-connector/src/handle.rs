//! Single-attempt wrapper around one live connection.

use std::future::Future;

use crate::error::ConnectError;

/// A live connection to an external resource.
///
/// Implementors only describe how to probe and release the resource; all
/// retry logic lives in the connector.
///
/// # Examples
///
/// ```
/// use relink_connector::Connection;
///
/// struct Session {
///     open: bool,
/// }
///
/// impl Connection for Session {
///     type Error = std::io::Error;
///
///     async fn is_valid(&mut self) -> bool {
///         self.open
///     }
///
///     async fn close(&mut self) {
///         self.open = false;
///     }
/// }
/// ```
pub trait Connection: Send + 'static {
    /// Error returned by operations on this connection.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Cheap liveness probe. Returns `false` for a dead connection instead
    /// of failing.
    fn is_valid(&mut self) -> impl Future<Output = bool> + Send;

    /// Releases the resource. Must tolerate being called on a dead
    /// connection.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens new connections. Connection parameters are captured by the
/// factory.
///
/// Any `Fn() -> impl Future<Output = Result<C, E>>` closure is a factory.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type produced.
    type Connection: Connection;

    /// Error returned when the resource cannot be reached.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Makes a single attempt to open a connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

impl<F, Fut, C, E> ConnectionFactory for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, E>> + Send,
    C: Connection,
    E: std::error::Error + Send + Sync + 'static,
{
    type Connection = C;
    type Error = E;

    fn connect(&self) -> impl Future<Output = Result<C, E>> + Send {
        self()
    }
}

/// Lifecycle of a [`ConnectionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No resource held.
    Closed,
    /// Resource held and believed healthy.
    Open,
    /// Resource held but known to be unreachable.
    Broken,
}

/// Exclusive owner of one connection.
///
/// Created by a successful [`open`](ConnectionHandle::open) and discarded
/// after a failure or an explicit close.
#[derive(Debug)]
pub struct ConnectionHandle<C> {
    connection: Option<C>,
    state: HandleState,
}

impl<C: Connection> ConnectionHandle<C> {
    /// Makes one attempt to open a connection through the factory.
    pub async fn open<F>(factory: &F) -> Result<Self, ConnectError>
    where
        F: ConnectionFactory<Connection = C>,
    {
        let connection = factory.connect().await.map_err(ConnectError::new)?;
        Ok(Self::from_connection(connection))
    }

    /// Wraps an already established connection.
    pub fn from_connection(connection: C) -> Self {
        Self {
            connection: Some(connection),
            state: HandleState::Open,
        }
    }

    /// Current handle state.
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Returns true while the handle is open.
    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    /// The connection, unless the handle has been closed.
    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.connection.as_mut()
    }

    /// Probes the connection. A failed probe marks the handle broken.
    pub async fn is_valid(&mut self) -> bool {
        if self.state != HandleState::Open {
            return false;
        }
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        let valid = connection.is_valid().await;
        if !valid {
            self.state = HandleState::Broken;
        }
        valid
    }

    /// Records that the resource was found unreachable.
    pub fn mark_broken(&mut self) {
        if self.state == HandleState::Open {
            self.state = HandleState::Broken;
        }
    }

    /// Releases the resource. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.state = HandleState::Closed;
    }
}
