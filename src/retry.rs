//! Session-level retry policy.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::{ErrorCategory, ScrapeError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomize delays by up to ±10%
    pub jitter: bool,
    /// Categories the caller never wants retried, on top of the
    /// categories that are never retryable
    pub non_retryable: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay),
            max_delay: Duration::from_millis(config.max_delay),
            jitter: true,
            non_retryable: Vec::new(),
        }
    }

    pub fn with_non_retryable(mut self, categories: &[ErrorCategory]) -> Self {
        self.non_retryable.extend_from_slice(categories);
        self
    }

    /// Whether `error` from attempt number `attempt` (1-based) earns another try
    pub fn should_retry(&self, error: &ScrapeError, attempt: u32) -> bool {
        if attempt >= self.max_attempts || matches!(error, ScrapeError::Cancelled) {
            return false;
        }
        let category = error.category();
        category.is_retryable() && !self.non_retryable.contains(&category)
    }

    /// Delay before the attempt following `attempt`: exponential for network
    /// and rate-limit failures, linear otherwise, capped at `max_delay`
    pub fn delay_for(&self, category: ErrorCategory, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_millis() as f64;
        let delay = if category.wants_exponential_backoff() {
            base * 2f64.powi(attempt as i32 - 1)
        } else {
            base * attempt as f64
        };
        let delay = delay.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter && delay > 0.0 {
            let spread = delay * 0.1;
            (delay + rand::thread_rng().gen_range(-spread..=spread)).max(0.0)
        } else {
            delay
        };
        Duration::from_millis(delay as u64)
    }

    /// Run `operation` until it succeeds or the policy gives up. The closure
    /// receives the 1-based attempt number; `on_retry` is told about every
    /// scheduled retry. Returns the result and the number of attempts made.
    pub async fn run<T, F, Fut, R>(&self, mut operation: F, mut on_retry: R) -> (Result<T, ScrapeError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
        R: FnMut(u32, Duration, ErrorCategory),
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) => {
                    if !self.should_retry(&e, attempt) {
                        debug!("Giving up after attempt {}: {}", attempt, e);
                        return (Err(e), attempt);
                    }
                    let category = e.category();
                    let delay = self.delay_for(category, attempt);
                    warn!(
                        "Attempt {}/{} failed ({}): {}. Retrying in {:?}",
                        attempt, self.max_attempts, category, e, delay
                    );
                    on_retry(attempt, delay, category);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod retry_test;
