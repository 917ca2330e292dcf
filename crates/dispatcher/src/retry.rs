//! RetryPolicy - bounded retries with a fixed, cancellable delay

use std::future::Future;
use std::time::Duration;

use contracts::ContractError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Attempt bookkeeping for one `RetryPolicy::execute` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    total_delay: Duration,
}

impl RetryState {
    /// Attempts made so far, including the first
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time spent sleeping between attempts
    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }
}

/// Retry configuration
///
/// Stateless across calls: no jitter, no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `max_retries` extra attempts have failed
    ///
    /// Both the attempt and the delay race against `cancel`.
    ///
    /// # Errors
    /// - The first non-retryable error, unchanged
    /// - `ContractError::RetriesExhausted` wrapping the last error
    /// - `ContractError::Cancelled`
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ContractError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ContractError>>,
    {
        let mut state = RetryState::default();
        loop {
            if cancel.is_cancelled() {
                return Err(ContractError::Cancelled);
            }
            state.attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ContractError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if state.attempts > self.max_retries {
                debug!(
                    label,
                    attempts = state.attempts,
                    total_delay_ms = state.total_delay.as_millis() as u64,
                    "Retries exhausted"
                );
                return Err(ContractError::RetriesExhausted {
                    attempts: state.attempts,
                    source: Box::new(err),
                });
            }

            error!(label, attempt = state.attempts, error = %err, "Attempt failed, retrying");
            observability::record_retry_attempt(label, state.attempts);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ContractError::Cancelled),
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
            state.total_delay += self.retry_delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> ContractError {
        ContractError::external("test", "connection reset")
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_attempts_and_sleeps() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = policy
            .execute("test", &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(matches!(
            result,
            Err(ContractError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1500) && waited < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let value = policy
            .execute("test", &CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
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
    async fn test_non_retryable_returns_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute("test", &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ContractError::resolution("bad key"))
            })
            .await;

        assert!(matches!(result, Err(ContractError::Resolution { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = policy
            .execute("test", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(matches!(result, Err(ContractError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_op() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = RetryPolicy::default()
            .execute("test", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ContractError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
