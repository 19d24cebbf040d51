//! Retry decision logic.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::backoff::{Backoff, ExponentialBackoff, FixedInterval, IntervalFunction, LinearBackoff};

/// Errors reported by [`RetryPolicy::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    /// A policy must allow at least one attempt.
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// Exponential multiplier is not a finite number >= 1.0.
    #[error("backoff multiplier must be finite and >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    /// The cap is lower than the first delay.
    #[error("max delay {max:?} is smaller than base delay {base:?}")]
    MaxBelowBase {
        /// First delay of the backoff.
        base: Duration,
        /// Configured cap.
        max: Duration,
    },
}

/// Decides whether to retry and how long to wait between attempts.
///
/// Attempt numbers count failed attempts within one outage: `0` means
/// nothing has failed yet, `1` means the first attempt failed, and so on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: Backoff,
    max_attempts: Option<u32>,
    max_elapsed: Option<Duration>,
    jitter: bool,
}

impl RetryPolicy {
    /// Creates a new builder.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Constant delay between at most `max_attempts` attempts.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self::builder()
            .fixed_backoff(delay)
            .max_attempts(max_attempts)
            .build()
    }

    /// Constant delay, retrying until the resource comes back.
    pub fn forever(delay: Duration) -> Self {
        Self::builder()
            .fixed_backoff(delay)
            .unlimited_attempts()
            .build()
    }

    /// Delay to wait after the failed attempt with the given 0-based index.
    ///
    /// Deterministic unless jitter is enabled, in which case the result is
    /// drawn uniformly from `[0, delay]`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter {
            full_jitter(delay)
        } else {
            delay
        }
    }

    /// Delay for the given attempt index before jitter is applied.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt as usize)
    }

    /// Returns whether another attempt is allowed.
    ///
    /// `attempt` is the number of attempts that have already failed and
    /// `elapsed` the time since the outage began. The first attempt is always
    /// allowed when under the cap; the elapsed budget only limits later ones.
    pub fn should_retry(&self, attempt: u32, elapsed: Duration) -> bool {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return false;
            }
        }
        if attempt == 0 {
            return true;
        }
        self.max_elapsed.map_or(true, |budget| elapsed < budget)
    }

    /// Maximum number of attempts, `None` when unbounded.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Time budget for one outage, if any.
    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    /// Whether delays are randomized.
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// The backoff shape.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Checks that the policy can make progress.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == Some(0) {
            return Err(PolicyError::ZeroAttempts);
        }
        match &self.backoff {
            Backoff::Exponential(exp) => {
                let multiplier = exp.growth();
                if !multiplier.is_finite() || multiplier < 1.0 {
                    return Err(PolicyError::InvalidMultiplier(multiplier));
                }
                if exp.cap() < exp.initial_interval() {
                    return Err(PolicyError::MaxBelowBase {
                        base: exp.initial_interval(),
                        max: exp.cap(),
                    });
                }
            }
            Backoff::Linear(linear) => {
                if linear.max_interval() < linear.initial_interval() {
                    return Err(PolicyError::MaxBelowBase {
                        base: linear.initial_interval(),
                        max: linear.max_interval(),
                    });
                }
            }
            Backoff::Constant(_) | Backoff::Custom(_) => {}
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Exponential backoff from 100ms to 5 seconds, unbounded attempts
        Self::builder().build()
    }
}

fn full_jitter(delay: Duration) -> Duration {
    let upper = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::rng().random_range(0..=upper))
}

/// Builder for [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    backoff: Backoff,
    max_attempts: Option<u32>,
    max_elapsed: Option<Duration>,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same delay between every attempt.
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.backoff = Backoff::Constant(FixedInterval::new(delay));
        self
    }

    /// Delay grows by `increment` after every failure, up to `max_delay`.
    pub fn linear_backoff(
        mut self,
        initial_delay: Duration,
        increment: Duration,
        max_delay: Duration,
    ) -> Self {
        self.backoff = Backoff::Linear(LinearBackoff::new(initial_delay, increment, max_delay));
        self
    }

    /// Delay doubles after every failure, up to `max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use relink_retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::builder()
    ///     .exponential_backoff(Duration::from_millis(100), Duration::from_secs(1))
    ///     .build();
    ///
    /// assert_eq!(policy.next_delay(10), Duration::from_secs(1));
    /// ```
    pub fn exponential_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.backoff = Backoff::Exponential(ExponentialBackoff::new(initial_delay, max_delay));
        self
    }

    /// Uses a fully configured backoff.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Uses a custom interval function.
    pub fn interval_fn<I>(mut self, interval: I) -> Self
    where
        I: IntervalFunction + 'static,
    {
        self.backoff = Backoff::Custom(Arc::new(interval));
        self
    }

    /// Sets the maximum number of attempts per outage.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retries until the resource comes back.
    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Stops retrying once an outage has lasted this long.
    pub fn max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Enables full jitter: delays are drawn uniformly from `[0, delay]`.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Builds the policy.
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            backoff: self.backoff,
            max_attempts: self.max_attempts,
            max_elapsed: self.max_elapsed,
            jitter: self.jitter,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential(ExponentialBackoff::new(
                Duration::from_millis(100),
                Duration::from_secs(5),
            )),
            max_attempts: None,
            max_elapsed: None,
            jitter: false,
        }
    }
}
