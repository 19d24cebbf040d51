//! Retry policies for reconnection loops.
//!
//! A [`RetryPolicy`] is pure decision logic: given how many attempts have
//! failed and how long the outage has lasted, it decides whether another
//! attempt is allowed and how long to wait before it.
//!
//! # Features
//!
//! - **IntervalFunction abstraction**: pluggable backoff strategies
//!   - Fixed interval
//!   - Linear backoff
//!   - Exponential backoff, always capped at a maximum delay
//!   - Custom function-based backoff
//! - **Attempt cap** or unbounded retries
//! - **Elapsed-time budget** for the whole outage
//! - **Full jitter**: delays drawn uniformly from `[0, delay]`
//!
//! # Examples
//!
//! ```
//! use relink_retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .exponential_backoff(Duration::from_millis(100), Duration::from_secs(5))
//!     .max_attempts(10)
//!     .build();
//!
//! assert!(policy.should_retry(0, Duration::ZERO));
//! assert_eq!(policy.next_delay(2), Duration::from_millis(400));
//! assert!(!policy.should_retry(10, Duration::ZERO));
//! ```

mod backoff;
mod policy;

pub use backoff::{
    Backoff, ExponentialBackoff, FixedInterval, FnInterval, IntervalFunction, LinearBackoff,
};
pub use policy::{PolicyError, RetryPolicy, RetryPolicyBuilder};
