//! Retry policy and the generic execute-with-retry helper

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, ErrorClass, Result};

/// Bounded retry with optional exponential backoff
///
/// Errors are classified by `classifier`; fatal errors are returned as-is on
/// first occurrence, retryable ones are attempted again until the budget
/// runs out, at which point the last error is wrapped in
/// `Error::BatchFailed`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    max_backoff: Duration,
    jitter: bool,
    classifier: fn(&Error) -> ErrorClass,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
            max_backoff: Duration::from_secs(30),
            jitter: true,
            classifier: Error::class,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_classifier(mut self, classifier: fn(&Error) -> ErrorClass) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, error: &Error) -> ErrorClass {
        (self.classifier)(error)
    }

    /// Delay before attempt `attempt + 1`
    ///
    /// The larger of the exponential backoff and any wait the oracle asked
    /// for, capped at `max_backoff`, plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32, error: &Error) -> Duration {
        let suggested = match error {
            Error::RateLimited(secs) => Duration::from_secs(*secs),
            _ => Duration::ZERO,
        };

        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self.backoff_base.saturating_mul(2u32.pow(exponent));
        let delay = computed.max(suggested).min(self.max_backoff);

        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let jitter_ms = (delay.as_millis() / 10) as u64;
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Run `operation` under `policy`
///
/// `operation` receives the 1-based attempt number.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if policy.classify(&error) == ErrorClass::Fatal => {
                return Err(error);
            }
            Err(error) if attempt >= policy.max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempts = attempt,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(Error::BatchFailed {
                    batch: operation_name.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }
            Err(error) => {
                let delay = policy.backoff(attempt, &error);
                warn!(
                    operation = %operation_name,
                    attempt,
                    wait_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
