//! Simulated database and event observers shared by the connector tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use relink_connector::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionFactory, EventListener,
    ManagedConnector, ReconnectConfig, ReconnectionStrategy, RetryPolicy,
};
use tokio::sync::watch;

/// Errors the simulated database can return.
#[derive(Debug, Clone, PartialEq)]
pub enum DbError {
    /// The server went away under an open connection.
    ConnectionClosed,
    /// No server is listening.
    ConnectionRefused,
    /// The statement itself is wrong.
    Syntax,
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::ConnectionClosed => write!(f, "connection closed by server"),
            DbError::ConnectionRefused => write!(f, "connection refused"),
            DbError::Syntax => write!(f, "syntax error"),
        }
    }
}

impl std::error::Error for DbError {}

#[derive(Default)]
struct Server {
    down: AtomicBool,
    /// Bumped on every stop so connections from before an outage stay dead.
    generation: AtomicU64,
    rows: AtomicU64,
    connects: AtomicU32,
    closes: AtomicU32,
}

/// A database that can be stopped and started from the test.
#[derive(Clone, Default)]
pub struct FlakyDatabase {
    server: Arc<Server>,
}

impl FlakyDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.server.generation.fetch_add(1, Ordering::SeqCst);
        self.server.down.store(true, Ordering::SeqCst);
    }

    pub fn start(&self) {
        self.server.down.store(false, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        !self.server.down.load(Ordering::SeqCst)
    }

    /// Connection attempts seen by the server, successful or not.
    pub fn connects(&self) -> u32 {
        self.server.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.server.closes.load(Ordering::SeqCst)
    }

    pub fn factory(&self) -> impl ConnectionFactory<Connection = DbConnection> {
        let db = self.clone();
        move || {
            let db = db.clone();
            async move {
                db.server.connects.fetch_add(1, Ordering::SeqCst);
                if db.is_up() {
                    let generation = db.server.generation.load(Ordering::SeqCst);
                    Ok(DbConnection { db, generation })
                } else {
                    Err(DbError::ConnectionRefused)
                }
            }
        }
    }

    /// A connector over this database with a fixed-interval policy.
    pub fn connector(
        &self,
        strategy: ReconnectionStrategy,
        delay: Duration,
        attempts: u32,
    ) -> ManagedConnector<impl ConnectionFactory<Connection = DbConnection>> {
        ManagedConnector::new(
            self.factory(),
            ReconnectConfig::builder()
                .name("test-db")
                .strategy(strategy)
                .policy(RetryPolicy::fixed(delay, attempts))
                .build(),
        )
    }
}

pub struct DbConnection {
    db: FlakyDatabase,
    generation: u64,
}

impl DbConnection {
    fn alive(&self) -> bool {
        self.db.is_up() && self.db.server.generation.load(Ordering::SeqCst) == self.generation
    }

    /// Reads the next row.
    pub async fn query(&mut self) -> Result<u64, DbError> {
        if !self.alive() {
            return Err(DbError::ConnectionClosed);
        }
        Ok(self.db.server.rows.fetch_add(1, Ordering::SeqCst))
    }

    /// A statement the server rejects.
    pub async fn bad_query(&mut self) -> Result<u64, DbError> {
        if !self.alive() {
            return Err(DbError::ConnectionClosed);
        }
        Err(DbError::Syntax)
    }
}

impl Connection for DbConnection {
    type Error = DbError;

    async fn is_valid(&mut self) -> bool {
        self.alive()
    }

    async fn close(&mut self) {
        self.db.server.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// `execute` operation reading one row.
pub fn query(conn: &mut DbConnection) -> BoxFuture<'_, Result<u64, DbError>> {
    Box::pin(conn.query())
}

/// `execute` operation that always fails with a syntax error.
pub fn bad_query(conn: &mut DbConnection) -> BoxFuture<'_, Result<u64, DbError>> {
    Box::pin(conn.bad_query())
}

/// Counts events of one kind and lets a test wait for a threshold.
#[derive(Clone)]
pub struct EventCountdown {
    kind: ConnectionEventKind,
    seen: Arc<watch::Sender<u32>>,
}

impl EventCountdown {
    pub fn new(kind: ConnectionEventKind) -> Self {
        let (seen, _) = watch::channel(0);
        Self {
            kind,
            seen: Arc::new(seen),
        }
    }

    pub fn count(&self) -> u32 {
        *self.seen.borrow()
    }

    /// Returns false if fewer than `n` events arrived within `timeout`.
    pub async fn wait_for(&self, n: u32, timeout: Duration) -> bool {
        let mut rx = self.seen.subscribe();
        let reached = async move { rx.wait_for(|count| *count >= n).await.is_ok() };
        tokio::time::timeout(timeout, reached)
            .await
            .unwrap_or(false)
    }
}

impl EventListener<ConnectionEvent> for EventCountdown {
    fn on_event(&self, event: &ConnectionEvent) {
        if event.kind() == self.kind {
            self.seen.send_modify(|count| *count += 1);
        }
    }
}

/// Records every event as `(kind, attempt)`.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<(ConnectionEventKind, u32)>>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<(ConnectionEventKind, u32)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: ConnectionEventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Attempt numbers carried by CONNECTION_FAILED events, in order.
    pub fn failed_attempts(&self) -> Vec<u32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == ConnectionEventKind::ConnectionFailed)
            .map(|(_, attempt)| *attempt)
            .collect()
    }
}

impl EventListener<ConnectionEvent> for EventLog {
    fn on_event(&self, event: &ConnectionEvent) {
        self.events
            .lock()
            .unwrap()
            .push((event.kind(), event.attempt()));
    }
}

/// Routes connector logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(false)
        .try_init();
}

pub const STRATEGIES: [ReconnectionStrategy; 2] = [
    ReconnectionStrategy::Blocking,
    ReconnectionStrategy::NonBlocking,
];
