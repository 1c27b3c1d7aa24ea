//! Retry timing shared by the connection and subscription managers.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff step between connect attempts
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Backoff step between subscribe attempts
pub const SUBSCRIBE_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Linear backoff: the wait after attempt `n` (1-indexed) is `n * interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Upper bound for one transport call; `None` waits as long as it takes
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn connect() -> Self {
        Self {
            interval: CONNECT_RETRY_INTERVAL,
            attempt_timeout: None,
        }
    }

    pub fn subscribe() -> Self {
        Self {
            interval: SUBSCRIBE_RETRY_INTERVAL,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.interval * attempt
    }

    /// Run one transport call, bounded by the attempt timeout if configured.
    pub async fn run_attempt<F, T>(&self, attempt: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| anyhow::anyhow!("timed out after {}s", limit.as_secs()))?,
            None => attempt.await,
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_backoff_is_linear() {
        let policy = RetryPolicy::connect();
        assert_eq!(policy.backoff(1), Duration::from_secs(10));
        assert_eq!(policy.backoff(2), Duration::from_secs(20));
        assert_eq!(policy.backoff(3), Duration::from_secs(30));
    }

    #[test]
    fn test_subscribe_backoff_is_linear() {
        let policy = RetryPolicy::subscribe();
        assert_eq!(policy.backoff(1), Duration::from_secs(3));
        assert_eq!(policy.backoff(4), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let policy = RetryPolicy::connect().with_attempt_timeout(Some(Duration::from_secs(5)));

        let result = policy
            .run_attempt(std::future::pending::<anyhow::Result<()>>())
            .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));

        assert_eq!(policy.run_attempt(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(1), &cancel).await.is_ok());

        cancel.cancel();
        assert!(matches!(
            sleep_or_cancel(Duration::from_secs(3600), &cancel).await,
            Err(Error::Cancelled)
        ));
    }
}
