//! Utility functions for blobroute

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Give a transient upstream failure one more chance after `delay`.
/// Non-retryable errors and second failures are returned as-is.
pub async fn retry_once<F, Fut, T>(mut f: F, delay: Duration) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    match f().await {
        Err(e) if e.is_retryable() => {
            tracing::warn!("upstream call failed ({}), retrying in {:?}", e, delay);
            tokio::time::sleep(delay).await;
            f().await
        }
        result => result,
    }
}
