use std::{future::Future, time::Duration};

use log::{debug, warn};
use rand::Rng;

use crate::config::RetryConfig;

use super::classifier::Classify;

/// Bounded retries with optional exponential backoff.
///
/// Attempts run from index 0 to `max_retries` inclusive. Errors whose kind is
/// not retryable end the run immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    use_backoff: bool,
    max_delay: Option<Duration>,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            use_backoff: true,
            max_delay: None,
            jitter: false,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            use_backoff: config.use_backoff,
            max_delay: config.max_delay_ms.map(Duration::from_millis),
            jitter: config.jitter,
        }
    }

    pub fn backoff(mut self, use_backoff: bool) -> Self {
        self.use_backoff = use_backoff;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the retry that follows failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = if self.use_backoff {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.base_delay
        };

        if let Some(max) = self.max_delay {
            delay = delay.min(max);
        }

        if self.jitter {
            delay = delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0));
        }
        delay
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. The last error is returned as is.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let kind = err.error_kind();
            if !kind.is_retryable() {
                debug!("Not retrying {kind} error: {err}");
                return Err(err);
            }
            if attempt >= self.max_retries {
                warn!("Giving up after {} attempts: {err}", attempt + 1);
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                "Attempt {} failed ({err}), retrying in {}ms",
                attempt + 1,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
