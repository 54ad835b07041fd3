//! Retry with exponential backoff for transient failures.
//!
//! Blob fetches and provider calls share the same policy: base 500 ms,
//! doubling per attempt, capped at 3 tries. Only errors classified as
//! transient are retried; everything else escalates immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{MinutaError, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds, doubled after each failed attempt.
    pub base_delay_ms: u64,
    /// Cap on a single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given zero-based failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Run `op` until it succeeds, a non-transient error occurs, or the attempt
/// budget is exhausted.
pub async fn with_backoff<T, F, Fut>(label: &str, config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    target: "minuta::retry",
                    "{label} failed (attempt {}/{}): {err}; retrying in {:?}",
                    attempt + 1,
                    config.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for_attempt(10), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            base_delay_ms: 1,
            ..Default::default()
        };
        let result = with_backoff("test", &cfg, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MinutaError::transient("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            base_delay_ms: 1,
            ..Default::default()
        };
        let result: Result<()> = with_backoff("test", &cfg, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MinutaError::transient("still down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_not_retried() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig::default();
        let result: Result<()> = with_backoff("test", &cfg, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MinutaError::not_found("blob")) }
        })
        .await;
        assert!(matches!(result, Err(MinutaError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
