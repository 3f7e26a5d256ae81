//! Retry with exponential backoff and jitter.
//!
//! The cloud client is the only place that retries: network errors, 408, 429,
//! 5xx and "entity busy" 400s are retried here and nowhere else.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and surface the error.
    Stop,
    /// Retry after the backoff delay.
    Retry,
    /// Retry after the delay the server asked for.
    RetryAfter(Duration),
}

/// Errors that know whether they are transient.
pub trait Retryable {
    /// Classify this error.
    fn retry_decision(&self) -> RetryDecision;
}

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Execute an async operation, retrying transient failures.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `max_retries` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let wait = match e.retry_decision() {
            RetryDecision::Stop => return Err(e),
            _ if attempt > config.max_retries => {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "Operation failed after max retries"
                );
                return Err(e);
            },
            RetryDecision::RetryAfter(after) => after,
            RetryDecision::Retry => {
                // 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                Duration::from_secs_f64(delay.as_secs_f64() * jitter)
            },
        };

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = wait.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::time::sleep(wait).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
