//! Bounded exponential backoff for provider calls.
//!
//! - HTTP 429 and 5xx, network errors → retry
//! - any other error → fail immediately
//! - backoff doubles from `base_delay`, capped at `max_delay`
//!
//! Ingestion is asynchronous and idempotent per content hash, so it retries
//! patiently. Query-time calls retry at most once and then surface a
//! "temporarily unavailable" answer.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff 1s, 2s, 4s, ... 32s for background ingestion.
    pub fn ingestion(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }

    /// A single quick retry for interactive requests.
    pub fn query() -> Self {
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(500),
        }
    }

    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(5);
        (self.base_delay * factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient provider error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
