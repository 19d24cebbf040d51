//! Declarative reconnection settings.
//!
//! Mirrors the attributes of a `<reconnect>` element so settings can live
//! in a configuration file:
//!
//! ```
//! use relink_connector::{ReconnectionSettings, ReconnectionStrategy};
//!
//! let settings: ReconnectionSettings =
//!     serde_json::from_str(r#"{ "blocking": false, "frequency-ms": 500, "count": 5 }"#).unwrap();
//!
//! let config = settings.into_builder().name("orders-db").build();
//! assert_eq!(config.strategy(), ReconnectionStrategy::NonBlocking);
//! assert_eq!(config.policy().max_attempts(), Some(5));
//! ```

use std::time::Duration;

use relink_retry::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::config::{ReconnectConfig, ReconnectConfigBuilder};
use crate::strategy::ReconnectionStrategy;

/// Reconnection settings with the same defaults as the `<reconnect>`
/// element: blocking, every 2 seconds, 2 attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReconnectionSettings {
    /// Recover on the calling task.
    pub blocking: bool,
    /// Delay between attempts, in milliseconds.
    pub frequency_ms: u64,
    /// Number of attempts before giving up. Ignored when `forever` is set.
    pub count: u32,
    /// Retry without limit.
    pub forever: bool,
}

impl Default for ReconnectionSettings {
    fn default() -> Self {
        Self {
            blocking: true,
            frequency_ms: 2000,
            count: 2,
            forever: false,
        }
    }
}

impl ReconnectionSettings {
    /// Delay between attempts.
    pub fn frequency(&self) -> Duration {
        Duration::from_millis(self.frequency_ms)
    }

    /// The strategy these settings select.
    pub fn strategy(&self) -> ReconnectionStrategy {
        if self.blocking {
            ReconnectionStrategy::Blocking
        } else {
            ReconnectionStrategy::NonBlocking
        }
    }

    /// A fixed-interval policy with the configured attempt limit.
    pub fn policy(&self) -> RetryPolicy {
        if self.forever {
            RetryPolicy::forever(self.frequency())
        } else {
            RetryPolicy::fixed(self.frequency(), self.count)
        }
    }

    /// A config builder preloaded with these settings.
    pub fn into_builder(self) -> ReconnectConfigBuilder {
        ReconnectConfig::builder()
            .strategy(self.strategy())
            .policy(self.policy())
    }
}

impl From<ReconnectionSettings> for ReconnectConfigBuilder {
    fn from(settings: ReconnectionSettings) -> Self {
        settings.into_builder()
    }
}
