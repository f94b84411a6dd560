//! Bounded retry with exponential backoff.
//!
//! Dispatch attempts that fail transiently are retried with a capped
//! exponential delay, optionally with full jitter so a burst of failed
//! conversions does not hit the worker again in lockstep.
//!
//! # Example
//!
//! ```rust,no_run
//! use shuk_dispatch::retry::{with_retry, RetryConfig};
//!
//! async fn notify_worker() -> Result<u16, std::io::Error> {
//!     Ok(202)
//! }
//!
//! async fn example() -> Result<u16, std::io::Error> {
//!     let config = RetryConfig {
//!         jitter: true,
//!         ..RetryConfig::default().with_max_attempts(4)
//!     };
//!
//!     with_retry(&config, notify_worker).await
//! }
//! ```

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Base for exponential backoff (typically 2.0)
    pub exponential_base: f64,

    /// Sleep a random duration in `[0, delay]` instead of `delay`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Short delays, for tests and local workers.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    /// Same delays with a different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay to apply after `delay`, following the exponential schedule.
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.exponential_base).min(self.max_delay.as_secs_f64()),
        )
    }

    /// Actual sleep for a scheduled delay.
    fn sleep_for(&self, delay: Duration) -> Duration {
        if self.jitter && !delay.is_zero() {
            let millis = delay.as_millis().min(u64::MAX as u128) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            delay
        }
    }
}

/// Execute a function with retries.
///
/// Every error is considered retryable. See [`with_retry_if`].
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    with_retry_if(config, f, |_| true).await
}

/// Execute a function with retries and a predicate for retryable errors.
///
/// The function is called at most `max_attempts` times. A non-retryable
/// error is returned immediately; otherwise the last error is returned once
/// the attempts are used up.
///
/// # Example
///
/// ```rust,no_run
/// use shuk_dispatch::retry::{with_retry_if, RetryConfig};
///
/// #[derive(Debug)]
/// enum MyError {
///     Transient,
///     Permanent,
/// }
///
/// async fn example() -> Result<(), MyError> {
///     with_retry_if(
///         &RetryConfig::default(),
///         || async { Err(MyError::Transient) },
///         |err| matches!(err, MyError::Transient),
///     )
///     .await
/// }
/// ```
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut f: F,
    mut is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                tracing::debug!(error = ?e, "Error is not retryable, returning immediately");
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                tracing::error!(attempts = attempt, error = ?e, "All retry attempts exhausted");
                return Err(e);
            }
            Err(e) => {
                let pause = config.sleep_for(delay);
                tracing::warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = pause.as_millis() as u64,
                    error = ?e,
                    "Attempt failed, retrying"
                );

                sleep(pause).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
