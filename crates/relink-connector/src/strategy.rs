//! The retry loop shared by both reconnection strategies.

use std::time::Duration;

use relink_retry::RetryPolicy;
use tokio_util::sync::CancellationToken;

use crate::error::FatalConnectError;
use crate::events::ConnectionNotifier;
use crate::handle::{ConnectionFactory, ConnectionHandle};
use crate::state::ReconnectState;

/// How a connector recovers from a lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ReconnectionStrategy {
    /// The calling task runs the retry loop and waits for it.
    #[default]
    Blocking,
    /// A background task runs the retry loop; callers are never held.
    NonBlocking,
}

impl ReconnectionStrategy {
    /// Returns true for [`ReconnectionStrategy::Blocking`].
    pub fn is_blocking(&self) -> bool {
        matches!(self, ReconnectionStrategy::Blocking)
    }
}

/// Why a recovery loop ended without a connection.
#[derive(Debug)]
pub(crate) enum RecoveryError {
    Exhausted(FatalConnectError),
    Cancelled,
}

/// Everything one run of the retry loop needs.
pub(crate) struct Recovery<'a, F> {
    pub(crate) factory: &'a F,
    pub(crate) policy: &'a RetryPolicy,
    pub(crate) state: &'a ReconnectState,
    pub(crate) notifier: &'a ConnectionNotifier,
    pub(crate) cancel: &'a CancellationToken,
}

impl<F: ConnectionFactory> Recovery<'_, F> {
    /// Runs attempts until one succeeds, the policy gives up or the token
    /// is cancelled.
    ///
    /// Always makes at least one attempt; callers check the budget before
    /// entering. On success returns the handle and the number of attempts
    /// the episode took. The caller installs the handle and publishes
    /// CONNECTED, or records the exhaustion.
    pub(crate) async fn run(self) -> Result<(ConnectionHandle<F::Connection>, u32), RecoveryError> {
        self.state.mark_reconnecting();
        let mut failures = self.state.attempts();

        loop {
            if failures > 0 {
                let delay = self.policy.next_delay(failures - 1);
                self.pause(failures, delay).await?;
            }

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RecoveryError::Cancelled),
                result = ConnectionHandle::open(self.factory) => result,
            };

            match opened {
                Ok(handle) => return Ok((handle, failures + 1)),
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        return Err(RecoveryError::Cancelled);
                    }
                    let cause = err.cause().clone();
                    failures = self.state.record_failure();
                    self.notifier.connection_failed(failures, cause.clone());

                    if exhausted(self.policy, self.state, failures) {
                        return Err(RecoveryError::Exhausted(FatalConnectError::Exhausted {
                            attempts: failures,
                            cause,
                        }));
                    }
                }
            }
        }
    }

    async fn pause(&self, failures: u32, delay: Duration) -> Result<(), RecoveryError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            connector = self.notifier.name(),
            attempt = failures + 1,
            delay_ms = delay.as_millis() as u64,
            "waiting before next connection attempt"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = failures;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RecoveryError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Returns true once the policy allows no further attempt.
pub(crate) fn exhausted(policy: &RetryPolicy, state: &ReconnectState, failures: u32) -> bool {
    !policy.should_retry(failures, state.episode_elapsed())
}
