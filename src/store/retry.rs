use std::future::Future;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::Result;

const MULTIPLIER: u32 = 2;
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Bounded exponential backoff for store calls made by background tasks.
///
/// Only transient errors are retried. Once `attempts` calls have failed the
/// last error is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRetry {
    attempts: u32,
    base_delay: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

impl StoreRetry {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_base_delay)
    }

    /// No retries: the first failure is returned.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry - 1), capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = MULTIPLIER.saturating_pow(retry - 1);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    pub async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        op,
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(op, attempt, error = %e, "Store call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn io_error() -> TransferError {
        TransferError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let retry = StoreRetry::new(5, Duration::from_millis(100));
        assert_eq!(retry.delay_for(0), Duration::ZERO);
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for(40), MAX_DELAY);
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(StoreRetry::new(0, Duration::ZERO).attempts(), 1);
        assert_eq!(StoreRetry::none().attempts(), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let retry = StoreRetry::new(3, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let value = retry
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(io_error())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let retry = StoreRetry::new(2, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = retry
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(io_error())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let retry = StoreRetry::new(5, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = retry
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransferError::InvalidStatus("bogus".to_string()))
            })
            .await;

        assert!(matches!(result, Err(TransferError::InvalidStatus(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
