//! Exponential backoff for the connect step.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Backoff parameters. `delay = min(base * factor^attempt, cap)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub factor: u64,
    pub cap_ms: u64,
    pub attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            factor: 2,
            cap_ms: 10_000,
            attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the given zero-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt);
        let ms = self.base_ms.saturating_mul(exp).min(self.cap_ms);
        Duration::from_millis(ms)
    }
}

/// Run an operation with backoff between failed attempts.
///
/// `sleep` is the only suspension point between attempts.
pub async fn with_backoff<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < policy.attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {} of {} failed ({}); retrying in {:?}",
                    attempt + 1,
                    policy.attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn test_delay_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8000));
        // Capped thereafter.
        assert_eq!(policy.delay_for(4), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = BackoffPolicy {
            base_ms: 1,
            factor: 2,
            cap_ms: 4,
            attempts: 3,
        };

        let mut calls = 0u32;
        let result = with_backoff(&policy, || {
            calls += 1;
            let outcome = if calls < 3 {
                Err(SyncError::Connect("transient".into()))
            } else {
                Ok(42)
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let policy = BackoffPolicy {
            base_ms: 1,
            factor: 2,
            cap_ms: 4,
            attempts: 2,
        };

        let mut calls = 0u32;
        let result: Result<()> = with_backoff(&policy, || {
            calls += 1;
            async { Err(SyncError::Connect("still down".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
