//! Retry logic for unit HTTP requests.
//!
//! Health probes get exactly one quick retry when no HTTP exchange happened
//! at all; an HTTP error status is an answer and is never retried. Control
//! requests issued by the [`DeviceClient`](crate::DeviceClient) use a slightly
//! more patient backoff.
//!
//! # Example
//!
//! ```
//! use coldwatch_core::{RetryConfig, with_retry};
//!
//! # async fn example() {
//! let config = RetryConfig::for_probe();
//!
//! // Retry while the returned value says so.
//! let value = with_retry(&config, "probe", || async { 42 }, |v| *v != 42).await;
//! assert_eq!(value, 42);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries (for exponential backoff).
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_probe()
    }
}

impl RetryConfig {
    /// Create a retry config with the probe delay and a custom retry count.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::for_probe()
        }
    }

    /// No retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::for_probe()
        }
    }

    // ==================== Per-Operation Presets ====================

    /// Retry configuration for health probes.
    ///
    /// One retry after a fixed 250 ms, no jitter. Probes run on a fixed
    /// cadence, so anything longer just overlaps the next cycle.
    pub fn for_probe() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Retry configuration for operator-initiated control requests.
    ///
    /// Controllers occasionally drop connections while busy writing
    /// settings, so control reads back off a little and add jitter.
    pub fn for_control() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    // ==================== Builder Methods ====================

    /// Set maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate delay for a given attempt number.
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Run an operation that always yields a value, retrying while
/// `should_retry` says the value is a transient failure.
///
/// Returns the last value produced, whether or not it succeeded.
pub async fn with_retry<F, Fut, T, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let mut attempt = 0;
    loop {
        let value = operation().await;
        if !should_retry(&value) {
            if attempt > 0 {
                debug!("{} settled after {} retries", operation_name, attempt);
            }
            return value;
        }
        if attempt >= config.max_retries {
            return value;
        }

        let delay = config.delay_for_attempt(attempt);
        debug!(
            "{} failed (attempt {}/{}), retrying in {:?}",
            operation_name,
            attempt + 1,
            config.max_retries + 1,
            delay
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Execute a fallible async operation with retry logic.
///
/// Errors for which `is_retryable` returns `false` are returned immediately.
/// Otherwise the last error is returned once all retries are spent.
pub async fn retry_result<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) || attempt >= config.max_retries {
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
