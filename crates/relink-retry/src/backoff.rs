use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Abstraction for computing the delay between attempts.
pub trait IntervalFunction: Send + Sync {
    /// Computes the delay after a failed attempt.
    ///
    /// # Arguments
    /// * `attempt` - Index of the failed attempt (0-indexed, so the delay
    ///   after the first failure is `next_interval(0)`)
    fn next_interval(&self, attempt: usize) -> Duration;
}

/// Fixed interval backoff - returns the same duration for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedInterval {
    duration: Duration,
}

impl FixedInterval {
    /// Creates a new fixed interval backoff.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Returns the fixed delay.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl IntervalFunction for FixedInterval {
    fn next_interval(&self, _attempt: usize) -> Duration {
        self.duration
    }
}

/// Linear backoff: `initial + increment * attempt`, capped at `max_interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearBackoff {
    initial_interval: Duration,
    increment: Duration,
    max_interval: Duration,
}

impl LinearBackoff {
    /// Creates a linear backoff that grows by `increment` per attempt.
    pub fn new(initial_interval: Duration, increment: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            increment,
            max_interval,
        }
    }

    /// Returns the delay used after the first failure.
    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// Returns the upper bound on any delay.
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }
}

impl IntervalFunction for LinearBackoff {
    fn next_interval(&self, attempt: usize) -> Duration {
        let steps = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.increment
            .checked_mul(steps)
            .and_then(|grown| self.initial_interval.checked_add(grown))
            .map_or(self.max_interval, |delay| delay.min(self.max_interval))
    }
}

/// Exponential backoff with configurable multiplier, capped at a maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff with the default multiplier of 2.0.
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier: 2.0,
            max_interval,
        }
    }

    /// Sets the multiplier for exponential growth.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum interval that caps exponential growth.
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Returns the delay used after the first failure.
    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// Returns the configured multiplier.
    pub fn growth(&self) -> f64 {
        self.multiplier
    }

    /// Returns the cap.
    pub fn cap(&self) -> Duration {
        self.max_interval
    }
}

impl IntervalFunction for ExponentialBackoff {
    fn next_interval(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        // powi overflows to infinity long before Duration would, so compare in f64.
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

/// Function-based interval implementation.
pub struct FnInterval<F> {
    f: F,
}

impl<F> FnInterval<F>
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    /// Creates a new function-based interval.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> IntervalFunction for FnInterval<F>
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    fn next_interval(&self, attempt: usize) -> Duration {
        (self.f)(attempt)
    }
}

/// The backoff shape used by a [`RetryPolicy`](crate::RetryPolicy).
pub enum Backoff {
    /// Same delay between every attempt.
    Constant(FixedInterval),

    /// Delay grows by a fixed increment.
    Linear(LinearBackoff),

    /// Delay grows geometrically up to a cap.
    Exponential(ExponentialBackoff),

    /// User supplied interval function.
    Custom(Arc<dyn IntervalFunction>),
}

impl Backoff {
    /// Delay after the failed attempt with the given 0-based index.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant(interval) => interval.next_interval(attempt),
            Backoff::Linear(linear) => linear.next_interval(attempt),
            Backoff::Exponential(backoff) => backoff.next_interval(attempt),
            Backoff::Custom(func) => func.next_interval(attempt),
        }
    }
}

impl Clone for Backoff {
    fn clone(&self) -> Self {
        match self {
            Self::Constant(f) => Self::Constant(f.clone()),
            Self::Linear(l) => Self::Linear(l.clone()),
            Self::Exponential(e) => Self::Exponential(e.clone()),
            Self::Custom(c) => Self::Custom(Arc::clone(c)),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(c) => f.debug_tuple("Constant").field(c).finish(),
            Self::Linear(l) => f.debug_tuple("Linear").field(l).finish(),
            Self::Exponential(e) => f.debug_tuple("Exponential").field(e).finish(),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}
