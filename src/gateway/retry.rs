use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Run `operation` with jittered exponential backoff while `retryable` says
/// the failure is worth another attempt.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    what: &str,
    retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let base_ms = config.backoff_base_ms.max(1);
    let mut backoff_ms = base_ms;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("{} succeeded on attempt {}", what, attempts);
                }
                return Ok(result);
            }
            Err(e) if !retryable(&e) => return Err(e),
            Err(e) if attempts >= config.max_attempts => {
                warn!("{}: all {} attempts failed: {}", what, attempts, e);
                return Err(e);
            }
            Err(e) => {
                // base * 2^attempt + random(0..base)
                let jitter = rand::random::<u64>() % base_ms;
                let delay = Duration::from_millis(backoff_ms + jitter);

                warn!(
                    "{}: attempt {} failed: {}. Retrying in {:?}...",
                    what, attempts, e, delay
                );

                sleep(delay).await;
                backoff_ms = backoff_ms.saturating_mul(2);
            }
        }
    }
}
