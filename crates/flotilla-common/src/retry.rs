//! Fixed-interval retry polling.
//!
//! Every polling loop the lifecycle controller relies on (wait for SSH, wait
//! for a state transition, delete-with-retry) uses the same shape: a fixed
//! 5-second step up to a per-operation timeout. Not-found errors stop the
//! loop immediately — they are never retried — so delete paths can treat them
//! as success; an observed abort propagates untouched.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Error;
use crate::Result;

/// The fixed step used by controller polling loops
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll an async operation every 5 seconds until it succeeds or `timeout`
/// elapses.
///
/// On timeout the returned error names the operation and carries the last
/// failure as a consequence.
pub async fn retry_every_5s<F, Fut, T>(
    operation_name: &str,
    timeout: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_every(operation_name, DEFAULT_POLL_INTERVAL, timeout, &mut operation).await
}

/// Same as [`retry_every_5s`] with a caller-chosen interval (tests use short
/// intervals to keep the suite fast).
pub async fn retry_every<F, Fut, T>(
    operation_name: &str,
    interval: Duration,
    timeout: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = tokio::time::Instant::now();
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_not_found() || e.is_aborted() => return Err(e),
            Err(e) => {
                if started.elapsed() + interval > timeout {
                    return Err(Error::timeout(operation_name, timeout).with_consequence(e));
                }
                warn!(
                    operation = %operation_name,
                    error = %e,
                    "still failing, polling again"
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_polling_succeeds_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_every("op", Duration::from_millis(1), Duration::from_secs(5), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.expect("result"), 42);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_polling_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_every(
            "op",
            Duration::from_millis(1),
            Duration::from_secs(5),
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::internal("probe", "not ready"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.expect("result"), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_polling_stops_on_not_found() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = retry_every(
            "delete subnet",
            Duration::from_millis(1),
            Duration::from_secs(5),
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::not_found("subnet", "c1"))
                }
            },
        )
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_polling_stops_on_abort() {
        let result: Result<()> = retry_every(
            "wait ssh",
            Duration::from_millis(1),
            Duration::from_secs(5),
            || async { Err(Error::aborted()) },
        )
        .await;

        assert!(result.unwrap_err().is_aborted());
    }

    #[tokio::test]
    async fn test_polling_times_out_with_last_error_as_consequence() {
        let result: Result<()> = retry_every(
            "wait ssh",
            Duration::from_millis(5),
            Duration::from_millis(12),
            || async { Err(Error::internal("ssh", "connection refused")) },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("wait ssh"));
        assert!(!err.consequences().is_empty());
    }
}
