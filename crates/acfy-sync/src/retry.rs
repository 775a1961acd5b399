//! Caller-side retry for transient fetch failures.

use std::future::Future;

use acfy_storage::BackoffPolicy;
use tracing::warn;

use crate::SyncError;

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy's retries are used up. Each attempt starts from scratch.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    what: &str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
