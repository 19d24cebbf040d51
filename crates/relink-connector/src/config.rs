use crate::strategy::ReconnectionStrategy;
use relink_retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether an operation error means the connection itself is gone.
///
/// Errors the predicate does not match are still checked against the
/// connection's liveness probe.
pub type ConnectionErrorPredicate = Arc<dyn Fn(&dyn std::error::Error) -> bool + Send + Sync>;

/// What a non-blocking connector does with calls that arrive while it is
/// reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhileRecovering {
    /// Return [`ConnectorError::Unavailable`](crate::ConnectorError::Unavailable) at once.
    #[default]
    FailFast,
    /// Wait up to the given bound for the connection to come back.
    WaitFor(Duration),
}

/// Configuration for a [`ManagedConnector`](crate::ManagedConnector).
pub struct ReconnectConfig {
    pub(crate) name: String,
    pub(crate) strategy: ReconnectionStrategy,
    pub(crate) policy: RetryPolicy,

    /// Whether to retry the operation once after a successful reconnect.
    pub(crate) retry_on_reconnect: bool,

    /// None means only the liveness probe classifies failures.
    pub(crate) connection_error_predicate: Option<ConnectionErrorPredicate>,

    pub(crate) validate_before_use: bool,
    pub(crate) while_recovering: WhileRecovering,
}

impl Clone for ReconnectConfig {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            strategy: self.strategy,
            policy: self.policy.clone(),
            retry_on_reconnect: self.retry_on_reconnect,
            connection_error_predicate: self.connection_error_predicate.clone(),
            validate_before_use: self.validate_before_use,
            while_recovering: self.while_recovering,
        }
    }
}

impl std::fmt::Debug for ReconnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfig")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("policy", &self.policy)
            .field("retry_on_reconnect", &self.retry_on_reconnect)
            .field(
                "connection_error_predicate",
                &self.connection_error_predicate.is_some(),
            )
            .field("validate_before_use", &self.validate_before_use)
            .field("while_recovering", &self.while_recovering)
            .finish()
    }
}

impl ReconnectConfig {
    /// Creates a new builder for configuring reconnection behavior.
    pub fn builder() -> ReconnectConfigBuilder {
        ReconnectConfigBuilder::default()
    }

    /// Returns the connector name used in events, logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the reconnection strategy.
    pub fn strategy(&self) -> ReconnectionStrategy {
        self.strategy
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns whether operations are retried after reconnection.
    pub fn retry_on_reconnect(&self) -> bool {
        self.retry_on_reconnect
    }

    /// Returns whether the connection is probed before every operation.
    pub fn validate_before_use(&self) -> bool {
        self.validate_before_use
    }

    /// Returns the policy for calls arriving during non-blocking recovery.
    pub fn while_recovering(&self) -> WhileRecovering {
        self.while_recovering
    }

    /// Returns true if a predicate has been configured.
    pub fn has_connection_error_predicate(&self) -> bool {
        self.connection_error_predicate.is_some()
    }

    /// Applies the configured predicate.
    ///
    /// Returns `None` when no predicate is set.
    pub fn is_connection_error(&self, error: &dyn std::error::Error) -> Option<bool> {
        self.connection_error_predicate
            .as_ref()
            .map(|predicate| predicate(error))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfigBuilder::default().build()
    }
}

/// Builder for constructing a `ReconnectConfig`.
pub struct ReconnectConfigBuilder {
    name: String,
    strategy: ReconnectionStrategy,
    policy: RetryPolicy,
    retry_on_reconnect: bool,
    connection_error_predicate: Option<ConnectionErrorPredicate>,
    validate_before_use: bool,
    while_recovering: WhileRecovering,
}

impl std::fmt::Debug for ReconnectConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfigBuilder")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("policy", &self.policy)
            .field("retry_on_reconnect", &self.retry_on_reconnect)
            .field(
                "connection_error_predicate",
                &self.connection_error_predicate.is_some(),
            )
            .field("validate_before_use", &self.validate_before_use)
            .field("while_recovering", &self.while_recovering)
            .finish()
    }
}

impl ReconnectConfigBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connector name.
    ///
    /// Default is `"connector"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Recover inline: callers wait for the retry loop.
    ///
    /// This is the default.
    pub fn blocking(self) -> Self {
        self.strategy(ReconnectionStrategy::Blocking)
    }

    /// Recover on a background task: callers are never held.
    pub fn non_blocking(self) -> Self {
        self.strategy(ReconnectionStrategy::NonBlocking)
    }

    /// Sets the reconnection strategy.
    pub fn strategy(mut self, strategy: ReconnectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the retry policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use relink_connector::{ReconnectConfig, RetryPolicy};
    ///
    /// let config = ReconnectConfig::builder()
    ///     .policy(RetryPolicy::fixed(Duration::from_millis(500), 5))
    ///     .build();
    /// assert_eq!(config.policy().max_attempts(), Some(5));
    /// ```
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets whether to retry the operation once after a reconnect.
    ///
    /// Default is `true`.
    pub fn retry_on_reconnect(mut self, retry: bool) -> Self {
        self.retry_on_reconnect = retry;
        self
    }

    /// Sets a predicate that marks operation errors as connectivity failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use relink_connector::ReconnectConfig;
    ///
    /// let config = ReconnectConfig::builder()
    ///     .connection_error_predicate(|error| {
    ///         error.to_string().to_lowercase().contains("broken pipe")
    ///     })
    ///     .build();
    /// assert!(config.has_connection_error_predicate());
    /// ```
    pub fn connection_error_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn std::error::Error) -> bool + Send + Sync + 'static,
    {
        self.connection_error_predicate = Some(Arc::new(predicate));
        self
    }

    /// Treats common network failures as connectivity loss.
    ///
    /// Matches on the error message: refused, reset, aborted, broken pipe,
    /// not connected and closed connections.
    pub fn connection_errors_only(self) -> Self {
        self.connection_error_predicate(|error| {
            let message = error.to_string().to_lowercase();
            message.contains("connection refused")
                || message.contains("connection reset")
                || message.contains("connection aborted")
                || message.contains("broken pipe")
                || message.contains("not connected")
                || message.contains("connection closed")
        })
    }

    /// Probes the connection before every operation.
    ///
    /// Default is `false`.
    pub fn validate_before_use(mut self, validate: bool) -> Self {
        self.validate_before_use = validate;
        self
    }

    /// Sets what non-blocking callers do while recovery runs.
    ///
    /// Ignored by the blocking strategy.
    pub fn while_recovering(mut self, policy: WhileRecovering) -> Self {
        self.while_recovering = policy;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ReconnectConfig {
        ReconnectConfig {
            name: self.name,
            strategy: self.strategy,
            policy: self.policy,
            retry_on_reconnect: self.retry_on_reconnect,
            connection_error_predicate: self.connection_error_predicate,
            validate_before_use: self.validate_before_use,
            while_recovering: self.while_recovering,
        }
    }
}

impl Default for ReconnectConfigBuilder {
    fn default() -> Self {
        Self {
            name: String::from("connector"),
            strategy: ReconnectionStrategy::Blocking,
            policy: RetryPolicy::default(),
            retry_on_reconnect: true,
            connection_error_predicate: None,
            validate_before_use: false,
            while_recovering: WhileRecovering::FailFast,
        }
    }
}
