//! Retry policies and an executor for transient failures.
//!
//! Used for broker (re)connection and for notification delivery backoff:
//! `min(multiplier^attempt * initial, max)` plus jitter.

use std::time::Duration;

use tracing::{debug, warn};

/// Retry policy with bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries.
    pub max_retries: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Backoff multiplier (2.0 for exponential doubling).
    pub backoff_multiplier: f64,
    /// Jitter factor in `[0, 1]`, fraction of the backoff added at random.
    pub jitter_factor: f64,
    /// Whether backoff grows exponentially.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given attempt (attempt 0 is the first try).
    pub fn next_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = if self.exponential {
            // multiplier^attempt: the first retry already waits a full
            // doubling over the initial backoff.
            let multiplier = if attempt > 30 {
                // Past this point the cap decides anyway.
                self.max_backoff.as_secs_f64() / self.initial_backoff.as_secs_f64().max(1e-9)
            } else {
                self.backoff_multiplier.powi(attempt as i32)
            };
            if multiplier.is_finite() && multiplier < 1e6 {
                Duration::from_secs_f64(self.initial_backoff.as_secs_f64() * multiplier)
            } else {
                self.max_backoff
            }
        } else {
            self.initial_backoff
        };

        let capped = base.min(self.max_backoff);
        let jitter = capped.as_secs_f64() * self.jitter_factor * rand::random::<f64>();
        let with_jitter = Duration::from_secs_f64(capped.as_secs_f64() + jitter);

        debug!(attempt, backoff_ms = with_jitter.as_millis() as u64, "calculated backoff");
        with_jitter
    }

    /// Whether another attempt is in budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Fixed-interval policy.
    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff: backoff,
            max_backoff: backoff,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
            exponential: false,
        }
    }

    /// Exponential policy doubling from `initial` up to `max`.
    pub fn exponential(max_retries: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff: initial,
            max_backoff: max,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            exponential: true,
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Succeeded, possibly after retries.
    Success {
        /// The operation's value
        value: T,
        /// Attempts used
        attempts: u32,
    },
    /// Failed after exhausting retries.
    Failed {
        /// The final error
        error: E,
        /// Attempts used
        attempts: u32,
    },
}

/// Runs operations under a retry policy.
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute an operation with retries.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return RetryResult::Success { value, attempts: attempt };
                }
                Err(error) => {
                    if !self.policy.should_retry(attempt) {
                        warn!(attempts = attempt + 1, %error, "operation failed, retries exhausted");
                        return RetryResult::Failed { error, attempts: attempt };
                    }
                    attempt += 1;
                    let backoff = self.policy.next_backoff(attempt);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, %error, "operation failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
