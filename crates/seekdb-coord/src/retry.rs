//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use seekdb_core::{CoreResult, RetryConfig};

/// Executes a fallible async operation with bounded retry and exponential
/// backoff, returning the last error once attempts are exhausted.
pub async fn with_backoff<F, Fut, T>(config: &RetryConfig, mut operation: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut attempt = 0u32;
    let mut delay_ms = config.initial_backoff_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt >= config.max_attempts {
                    error!("operation failed after {} attempts: {}", attempt, err);
                    return Err(err);
                }

                // Calculate delay with jitter
                let jitter_range = (delay_ms as f64 * config.jitter_percent) as u64;
                let jitter = if jitter_range == 0 {
                    0
                } else {
                    rand::random::<u64>() % (jitter_range + 1)
                };
                let actual_delay = delay_ms + jitter;

                warn!(
                    "operation failed (attempt {}/{}), retrying after {}ms: {}",
                    attempt, config.max_attempts, actual_delay, err
                );

                sleep(Duration::from_millis(actual_delay)).await;

                delay_ms = ((delay_ms as f64 * config.backoff_multiplier) as u64)
                    .min(config.max_backoff_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use seekdb_core::CoreError;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            backoff_multiplier: 2.0,
            jitter_percent: 0.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = with_backoff(&fast_config(5), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(CoreError::storage("transient"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);

        let result: CoreResult<()> = with_backoff(&fast_config(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::storage("down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_attempt_success_does_not_sleep() {
        let result = with_backoff(&fast_config(1), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
