//! Managed connections that survive transient outages.
//!
//! A [`ManagedConnector`] owns one logical connection to an external
//! resource such as a database. When an operation finds the resource
//! unreachable, the connector closes the dead handle, tells its observers,
//! and runs a reconnection loop driven by a [`RetryPolicy`] until the
//! resource is back or the policy gives up.
//!
//! # Features
//!
//! - **Two strategies** sharing one retry loop
//!   - Blocking: the caller waits while the connector reconnects
//!   - Non-blocking: a background task reconnects, callers get
//!     [`ConnectorError::Unavailable`] (or wait up to a bound)
//! - **Connection events**: CONNECTED, CONNECTION_FAILED and DISCONNECTED,
//!   published in order with attempt numbers
//! - **Single retry** of the interrupted operation after a reconnect
//! - **Tower integration** through [`ConnectorService`]
//! - **Declarative settings** with the `serde` feature
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use relink_connector::{
//!     Connection, ConnectionEventKind, ManagedConnector, ReconnectConfig, RetryPolicy,
//! };
//!
//! struct Database;
//!
//! impl Connection for Database {
//!     type Error = std::io::Error;
//!
//!     async fn is_valid(&mut self) -> bool {
//!         true
//!     }
//!
//!     async fn close(&mut self) {}
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let connector = ManagedConnector::new(
//!     || async { Ok::<_, std::io::Error>(Database) },
//!     ReconnectConfig::builder()
//!         .name("orders-db")
//!         .non_blocking()
//!         .policy(RetryPolicy::forever(Duration::from_secs(2)))
//!         .build(),
//! );
//!
//! connector.subscribe_fn(|event| {
//!     if event.kind() == ConnectionEventKind::ConnectionFailed {
//!         eprintln!("{} attempt {} failed", event.connector(), event.attempt());
//!     }
//! });
//!
//! connector.start().await.unwrap();
//! connector.stop().await;
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `tracing`: structured logs for connection transitions
//! - `metrics`: attempt, transition and exhaustion counters plus a
//!   connected gauge
//! - `serde`: [`ReconnectionSettings`]

mod config;
mod connector;
mod error;
mod events;
mod handle;
mod service;
#[cfg(feature = "serde")]
mod settings;
mod state;
mod strategy;

pub use config::{
    ConnectionErrorPredicate, ReconnectConfig, ReconnectConfigBuilder, WhileRecovering,
};
pub use connector::{ManagedConnector, OperationError};
pub use error::{Cause, ConnectError, ConnectorError, ErrorSnapshot, FatalConnectError};
pub use events::{ConnectionEvent, ConnectionEventKind, ConnectionNotifier};
pub use handle::{Connection, ConnectionFactory, ConnectionHandle, HandleState};
pub use service::ConnectorService;
#[cfg(feature = "serde")]
pub use settings::ReconnectionSettings;
pub use state::{ConnectionState, ReconnectState};
pub use strategy::ReconnectionStrategy;

// Re-export the policy types for convenience
pub use relink_core::{Event, EventListener, SubscriptionId};
pub use relink_retry::{Backoff, ExponentialBackoff, FixedInterval, LinearBackoff, RetryPolicy};
