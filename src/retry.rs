//! Fixed-delay retries for eventually-consistent remote calls.
//!
//! The delay between attempts never changes: there is no exponential growth
//! and no jitter. The wrapped action must be idempotent.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::progress::ProgressSink;

/// Progress line emitted before each delayed retry unless overridden.
pub const DEFAULT_NOTICE: &str = "waiting for services to settle...";

/// Delay between attempts and the overall budget measured from the first
/// attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Fixed pause before every retry.
    pub delay: Duration,
    /// A failure seen after more than this much time since the first attempt
    /// is final.
    pub max_duration: Duration,
}

impl RetryPolicy {
    /// Creates a policy from a fixed delay and a budget.
    #[must_use]
    pub const fn new(delay: Duration, max_duration: Duration) -> Self {
        Self {
            delay,
            max_duration,
        }
    }

    /// Whether a failure observed `elapsed` after the first attempt earns
    /// another attempt. A zero budget allows only the first attempt.
    fn allows_retry_after(&self, elapsed: Duration) -> bool {
        !self.max_duration.is_zero() && elapsed <= self.max_duration
    }
}

/// Returned when every attempt allowed by a [`RetryPolicy`] failed.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryExhausted<E> {
    /// Number of times the action ran.
    pub attempts: u32,
    /// Time between the first attempt and giving up.
    pub elapsed: Duration,
    /// Failure from the final attempt.
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempt{} over {}s: {}",
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.elapsed.as_secs(),
            self.last_error
        )
    }
}

impl<E: Error + 'static> Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.last_error)
    }
}

/// Re-runs a failing action on a fixed schedule until it succeeds or the
/// budget runs out.
pub struct RetryScheduler<'a, K: ?Sized> {
    clock: &'a K,
    progress: &'a dyn ProgressSink,
    notice: String,
}

impl<'a, K: Clock + ?Sized> RetryScheduler<'a, K> {
    /// Creates a scheduler that reports [`DEFAULT_NOTICE`] before each retry.
    #[must_use]
    pub fn new(clock: &'a K, progress: &'a dyn ProgressSink) -> Self {
        Self {
            clock,
            progress,
            notice: String::from(DEFAULT_NOTICE),
        }
    }

    /// Replaces the progress line emitted before each retry.
    #[must_use]
    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = notice.into();
        self
    }

    /// Invokes `action` immediately and again after every `policy.delay`
    /// until it succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] carrying the most recent failure once a
    /// failure is observed after `policy.max_duration` has passed.
    pub async fn retry_until<T, E, F, Fut>(
        &self,
        policy: RetryPolicy,
        mut action: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let started = self.clock.now();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            debug!(attempt = attempts, "starting attempt");
            let last_error = match action().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let elapsed = self.clock.elapsed_since(started);
            if !policy.allows_retry_after(elapsed) {
                warn!(
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    error = %last_error,
                    "retry budget exhausted"
                );
                return Err(RetryExhausted {
                    attempts,
                    elapsed,
                    last_error,
                });
            }

            warn!(
                attempt = attempts,
                delay_ms = policy.delay.as_millis(),
                error = %last_error,
                "attempt failed, retrying"
            );
            self.progress.notify(&self.notice);
            self.clock.sleep(policy.delay).await;
        }
    }
}
