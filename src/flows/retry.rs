//! Bounded retry for transient store failures.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

/// Retries beyond the first attempt. Kept small: by the time a store
/// has failed three times the caller should see the failure.
const MAX_RETRIES: u32 = 2;

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Run an idempotent read, retrying `StoreUnavailable` with jittered
/// exponential backoff.
///
/// Only reads go through here. Writes (session creation, rotation,
/// anything that issues tokens) are never retried, because a retry
/// after an ambiguous failure could create duplicate state.
pub(crate) async fn retry_read<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0;

    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                tracing::debug!(
                    target: "auth.store.retry",
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient store failure, retrying read"
                );
                let jitter = Duration::from_millis(fastrand::u64(0..25));
                tokio::time::sleep(backoff + jitter).await;
                backoff *= 2;
            }
            other => return other,
        }
    }
}
