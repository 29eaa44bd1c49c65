use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::workflow::errors::TransportError;

/// Linear backoff: the wait before retry `n` (1-based) is `n * step`,
/// capped at `cap`. `max_retries` counts repeats after the first call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub step: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Batch image-URL resolution and per-asset downloads.
    pub const ASSET_BATCH: RetryPolicy =
        RetryPolicy::linear(3, Duration::from_secs(10), Duration::from_secs(60));
    /// Each scale attempt of whole-frame rasterization.
    pub const FRAME_RENDER: RetryPolicy =
        RetryPolicy::linear(10, Duration::from_secs(10), Duration::from_secs(60));

    pub const fn linear(max_retries: u32, step: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            step,
            cap,
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.step.saturating_mul(retry).min(self.cap)
    }

    /// Every wait the policy can impose, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries)
            .map(|retry| self.delay_for(retry))
            .collect()
    }
}

/// Runs `operation` until it succeeds, fails definitively, or the policy
/// budget is spent. Waits are sequential; a call never overlaps its own
/// retry.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() => {
                if retry >= policy.max_retries {
                    return Err(TransportError::RetriesExhausted {
                        attempts: retry + 1,
                        last: Box::new(error),
                    });
                }
                retry += 1;
                let wait = policy.delay_for(retry);
                warn!(
                    request = label,
                    retry,
                    max_retries = policy.max_retries,
                    wait_secs = wait.as_secs_f32(),
                    %error,
                    "transient upstream failure, backing off"
                );
                tokio::time::sleep(wait).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{retry_transient, RetryPolicy};
    use crate::workflow::errors::TransportError;

    fn rate_limited() -> TransportError {
        TransportError::RateLimited {
            retry_after_secs: None,
        }
    }

    #[test]
    fn schedules_are_linear_and_capped() {
        let secs = |policy: RetryPolicy| {
            policy
                .schedule()
                .into_iter()
                .map(|wait| wait.as_secs())
                .collect::<Vec<_>>()
        };
        assert_eq!(secs(RetryPolicy::ASSET_BATCH), vec![10, 20, 30]);
        assert_eq!(
            secs(RetryPolicy::FRAME_RENDER),
            vec![10, 20, 30, 40, 50, 60, 60, 60, 60, 60]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_rate_limits_within_budget() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result = retry_transient(&RetryPolicy::ASSET_BATCH, "test", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(rate_limited())
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third call succeeds"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_the_budget_is_definitive() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = retry_transient(&RetryPolicy::ASSET_BATCH, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;

        match result {
            Err(TransportError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(last.is_rate_limited());
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn definitive_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&RetryPolicy::FRAME_RENDER, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Unauthorized) }
        })
        .await;
        assert!(matches!(result, Err(TransportError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
