//! Retry and timeout helpers for phone operations
//!
//! `register()` never retries on its own; callers that want a retried
//! composite registration use [`Phone::register_with_retry`](super::Phone::register_with_retry)
//! or wrap their own operation in [`retry_with_backoff`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{PhoneError, PhoneResult};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to ±10% jitter to each delay
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays, more attempts (e.g. the realtime handshake)
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// Long delays (e.g. a directory service that is shedding load)
    pub fn slow() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 3.0,
            use_jitter: false,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
        let millis = delay.as_millis() as f64;
        Duration::from_millis((millis * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// Retry an operation with exponential backoff while its error is recoverable
pub async fn retry_with_backoff<T, F, Fut>(operation_name: &str, config: RetryConfig, mut operation: F) -> PhoneResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PhoneResult<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!(
            operation = operation_name,
            attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < config.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );

                sleep(config.jittered(delay)).await;

                let next_delay_ms = (delay.as_millis() as f64 * config.backoff_multiplier) as u64;
                delay = Duration::from_millis(next_delay_ms).min(config.max_delay);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(operation = operation_name, attempts = attempt, error = %e, "Operation failed after all retry attempts");
                } else {
                    error!(operation = operation_name, error = %e, category = e.category(), "Non-recoverable error, not retrying");
                }
                return Err(e);
            }
        }
    }
}

/// Bound an operation, mapping expiry to [`PhoneError::OperationTimeout`]
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> PhoneResult<T>
where
    F: Future<Output = PhoneResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation = operation_name, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
            Err(PhoneError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
