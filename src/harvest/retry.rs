//! Retry policy for single remote operations.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::{FetchError, HarvestError};

/// Run `op` with linear backoff, up to `max_attempts` attempts.
///
/// Blocked failures are never retried here: rotating identity is the only
/// useful response to them, and that decision belongs to the run loop.
/// Transient failures sleep `base_delay × attempt` between attempts; once
/// the budget is spent the last failure is surfaced as
/// [`HarvestError::Exhausted`].
pub async fn with_retry<T, F, Fut>(
    mut op: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, HarvestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ FetchError::Blocked { .. }) => return Err(HarvestError::Fetch(err)),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(HarvestError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
                let delay = base_delay * attempt;
                debug!(
                    "attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_blocked_errors_are_never_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::blocked("HTTP 403")) }
            },
            5,
            Duration::ZERO,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(HarvestError::Fetch(FetchError::Blocked { .. }))
        ));
    }

    #[tokio::test]
    async fn test_transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FetchError::transient("connection reset"))
                    } else {
                        Ok(42)
                    }
                }
            },
            5,
            Duration::ZERO,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::transient("HTTP 500")) }
            },
            3,
            Duration::ZERO,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(HarvestError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(!source.is_blocked());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
