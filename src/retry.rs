//! Retry logic with exponential backoff
//!
//! [`RetryPolicy`] is a pure description of the backoff schedule shared by the
//! page walker, link resolver and download orchestrator. Jitter is applied
//! separately so the schedule itself stays deterministic.
//!
//! # Example
//!
//! ```no_run
//! use lbry_harvest::retry::{with_retry, IsRetryable, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "transient")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let policy = RetryPolicy::default();
//! let cancel = CancellationToken::new();
//! with_retry(&policy, &cancel, "example", || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, rate limits, 5xx responses) return `true`.
/// Permanent failures (404, malformed content) return `false`.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff schedule with a capped delay and an attempt budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per item, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    ///
    /// `attempt` is 1-based: the delay after the first failure is
    /// `initial_delay`, and each later one grows by `multiplier` until it
    /// reaches `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Returns true if another attempt is allowed after `attempts_made`
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// The delay for `attempt` with jitter applied when enabled
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            add_jitter(delay)
        } else {
            delay
        }
    }
}

/// Adds up to 25% random jitter to a delay
fn add_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=0.25);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

/// Execute an async operation with exponential backoff retry logic
///
/// Retries while the error is retryable and the policy's budget allows.
/// Cancellation interrupts a backoff sleep and returns the last error.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "{} succeeded after retry", label);
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                let delay = policy.backoff(attempt);
                tracing::debug!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "{} failed, retrying",
                    label
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, attempts = attempt, "{} failed after all retry attempts", label);
                } else {
                    tracing::debug!(error = %e, "{} failed with non-retryable error", label);
                }
                return Err(e);
            }
        }
    }
}
