//! Error taxonomy for managed connections.
//!
//! - [`ConnectError`]: one failed attempt to open the resource. Transient;
//!   the reconnection strategy absorbs it.
//! - [`FatalConnectError`]: the retry budget is spent or the configuration
//!   is unusable. Surfaced to the caller.
//! - [`ConnectorError`]: what `start()` and `execute()` return.

use std::error::Error as StdError;
use std::sync::Arc;

use relink_retry::PolicyError;

/// Shared, cloneable error cause.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// A single attempt to open the resource failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to connect: {cause}")]
pub struct ConnectError {
    #[source]
    cause: Cause,
}

impl ConnectError {
    /// Wraps the error returned by a connection factory.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            cause: Arc::new(error),
        }
    }

    /// The underlying factory error.
    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}

/// Text of an operation error, kept as an event cause while the original
/// error goes back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ErrorSnapshot {
    message: String,
}

impl ErrorSnapshot {
    pub(crate) fn of(error: &dyn StdError) -> Self {
        Self {
            message: error.to_string(),
        }
    }

    /// The captured message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Unrecoverable failure: the connector stays down until restarted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FatalConnectError {
    /// Every attempt allowed by the retry policy failed.
    #[error("reconnection failed after {attempts} attempts: {cause}")]
    Exhausted {
        /// Number of failed attempts in the episode.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        cause: Cause,
    },

    /// The configuration cannot be used.
    #[error("invalid reconnection configuration: {0}")]
    InvalidConfig(String),
}

impl From<PolicyError> for FatalConnectError {
    fn from(error: PolicyError) -> Self {
        FatalConnectError::InvalidConfig(error.to_string())
    }
}

/// Errors returned by [`ManagedConnector`](crate::ManagedConnector) operations.
///
/// `E` is the error type of the managed connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError<E> {
    /// Reconnection gave up or the configuration is invalid.
    #[error(transparent)]
    Fatal(#[from] FatalConnectError),

    /// The connection is down and is being re-established in the background.
    #[error("connection unavailable, reconnecting (failed attempts so far: {attempt})")]
    Unavailable {
        /// Failed attempts in the current episode at the time of the call.
        attempt: u32,
    },

    /// The operation failed for a reason unrelated to connectivity.
    #[error("operation failed: {0}")]
    Operation(#[source] E),

    /// The operation lost the connection and was not retried.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] E),

    /// `execute()` was called before `start()`.
    #[error("connector has not been started")]
    NotStarted,

    /// The connector has been stopped.
    #[error("connector is stopped")]
    Stopped,
}

impl<E> ConnectorError<E> {
    /// Returns true for [`ConnectorError::Fatal`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectorError::Fatal(_))
    }

    /// Returns true for the transient [`ConnectorError::Unavailable`] signal.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ConnectorError::Unavailable { .. })
    }

    /// Returns true for [`ConnectorError::Operation`].
    pub fn is_operation(&self) -> bool {
        matches!(self, ConnectorError::Operation(_))
    }

    /// Returns the fatal error, if this is one.
    pub fn as_fatal(&self) -> Option<&FatalConnectError> {
        match self {
            ConnectorError::Fatal(fatal) => Some(fatal),
            _ => None,
        }
    }

    /// Returns the connection's own error, if one is wrapped.
    pub fn into_inner(self) -> Option<E> {
        match self {
            ConnectorError::Operation(e) | ConnectorError::ConnectionLost(e) => Some(e),
            _ => None,
        }
    }
}
