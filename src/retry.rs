//! Retry of remote calls that fail transiently.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Additional attempts after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Delay unit; attempt `n` waits `n` units.
pub const DEFAULT_BASE_DELAY_MS: u64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based), growing linearly.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Run `op`, retrying transient failures according to `policy`.
///
/// Non-transient errors are returned immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Remote call failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::Cell;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(800));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1600));
    }

    #[test]
    fn test_transient_errors_retry_twice_then_fail() {
        let calls = Cell::new(0);
        let result: Result<()> = tokio_test::block_on(with_retry(&instant(), "fetch", || {
            calls.set(calls.get() + 1);
            async { Err(Error::Timeout) }
        }));

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_recovers_after_transient_failure() {
        let calls = Cell::new(0);
        let result = tokio_test::block_on(with_retry(&instant(), "fetch", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 2 {
                    Err(Error::Network("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        }));

        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_non_transient_fails_immediately() {
        let calls = Cell::new(0);
        let result: Result<()> = tokio_test::block_on(with_retry(&instant(), "save", || {
            calls.set(calls.get() + 1);
            async { Err(Error::validation("name", "is required")) }
        }));

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
