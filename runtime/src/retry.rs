//! Bounded backoff for contended rows.
//!
//! Ledger row locks are acquired with a bounded wait; a wait that times out
//! surfaces as [`ConcurrencyConflict`](ferry_core::ReservationError::ConcurrencyConflict).
//! The runtime retries those a few times before giving the error to the
//! caller, so no operation blocks indefinitely.
//!
//! ```rust
//! use ferry_runtime::retry::{RetryPolicy, retry_on_contention};
//! use std::time::Duration;
//!
//! # async fn example() -> ferry_core::Result<()> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(50))
//!     .max_delay(Duration::from_secs(1))
//!     .build();
//!
//! let seats = retry_on_contention(policy, || async { Ok(42) }).await?;
//! assert_eq!(seats, 42);
//! # Ok(())
//! # }
//! ```

use ferry_core::{ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Doubling stops growing after this many attempts.
const MAX_DOUBLINGS: u32 = 20;

/// How often, and how patiently, a contended operation is retried.
///
/// The delay before retry `n` (0-based) is `initial_delay * 2^n`, capped at
/// `max_delay`. Defaults: 3 retries, 50ms, 1s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Start from the defaults.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self {
                max_retries: 3,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(1),
            },
        }
    }

    /// Fail on the first contention.
    #[must_use]
    pub const fn none() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let doublings = u32::try_from(attempt).map_or(MAX_DOUBLINGS, |n| n.min(MAX_DOUBLINGS));
        self.initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Cap on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Finish.
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Runs `operation`, retrying while it fails with `ConcurrencyConflict`.
///
/// Every other error is final and returned at once. Each retry increments
/// `ferry.ledger.lock_retries`. The closure is re-run from scratch, so it
/// must reload whatever it decides on.
///
/// # Errors
///
/// The first non-contention error, or the last contention error once
/// `policy.max_retries` retries are spent.
pub async fn retry_on_contention<F, Fut, T>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(retries = attempt, "Contended operation went through");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if err.kind() != ErrorKind::ConcurrencyConflict {
            return Err(err);
        }
        if attempt >= policy.max_retries {
            tracing::warn!(retries = attempt, error = %err, "Still contended; giving up");
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        crate::metrics::lock_retry();
        tracing::debug!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Contended; backing off"
        );
        sleep(delay).await;
        attempt += 1;
    }
}
