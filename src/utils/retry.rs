use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::event_sourcing::core::EventStoreError;

// ============================================================================
// Exponential Backoff Retry Strategy
// ============================================================================
//
// The event store never retries on its own. A command handler that wants
// to survive optimistic concurrency conflicts wraps its whole
// "load -> decide -> persist" cycle in `retry_on_transient`, so every
// attempt rehydrates from the latest stream version.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Many short attempts, for streams with heavy write contention
    pub fn contended() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }

    /// A single retry
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.multiplier).min(self.max_delay)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed after all retries
    Failed(E),
    /// Operation permanently failed (should not retry)
    PermanentFailure(E),
}

impl<T, E> RetryResult<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed(error) | RetryResult::PermanentFailure(error) => Err(error),
        }
    }
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Only a lost optimistic concurrency race is worth another attempt;
/// everything else fails the same way on replay.
impl IsTransient for EventStoreError {
    fn is_transient(&self) -> bool {
        self.is_concurrency_conflict()
    }
}

/// Execute an operation with exponential backoff, retrying every error
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    run(config, operation, |_| true).await
}

/// Execute an operation with exponential backoff, stopping at the first permanent error
pub async fn retry_on_transient<F, Fut, T, E>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    run(config, operation, |error: &E| error.is_transient()).await
}

async fn run<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
    retryable: impl Fn(&E) -> bool,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success(result);
            }
            Err(error) if !retryable(&error) => {
                tracing::error!(error = %error, "Permanent failure detected, not retrying");
                return RetryResult::PermanentFailure(error);
            }
            Err(error) if attempt >= config.max_attempts => {
                tracing::error!(
                    attempt = attempt,
                    error = %error,
                    "Operation failed after all retries"
                );
                return RetryResult::Failed(error);
            }
            Err(error) => {
                tracing::warn!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying after delay"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::StreamId;
    use crate::event_sourcing::EventStore;
    use crate::test_support::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
        };

        let second = config.next_delay(config.initial_delay);
        let third = config.next_delay(second);

        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(third, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(fast(), |_attempt| {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err("temporary failure")
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Success("success")));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let result = retry_with_backoff(fast(), |_attempt| async {
            Err::<(), _>("persistent failure")
        })
        .await;

        assert!(matches!(result, RetryResult::Failed(_)));
    }

    #[test]
    fn test_only_concurrency_conflicts_are_transient() {
        let conflict = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::from("s"),
            expected: 1,
            actual: 2,
        };

        assert!(conflict.is_transient());
        assert!(!EventStoreError::StreamNotFound(StreamId::from("s")).is_transient());
        assert!(!EventStoreError::Backend("down".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_transient(fast(), |_attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(EventStoreError::StreamNotFound(StreamId::from("missing"))) }
        })
        .await;

        assert!(matches!(result, RetryResult::PermanentFailure(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflicted_command_succeeds_after_reload() {
        let store = EventStore::in_memory();
        let stream = StreamId::from("hall");
        store.persist(&mut open("hall", "Hall", 50).unwrap()).await.unwrap();

        // A competing writer sneaks in between our first load and persist
        let mut stale = store.aggregate_stream::<Venue>(&stream).await.unwrap();
        let mut competitor = store.aggregate_stream::<Venue>(&stream).await.unwrap();
        rename(&mut competitor, "Competitor").unwrap();
        store.persist(&mut competitor).await.unwrap();
        rename(&mut stale, "Ours").unwrap();
        assert!(store.persist(&mut stale).await.unwrap_err().is_concurrency_conflict());

        let result = retry_on_transient(fast(), |_attempt| {
            let store = store.clone();
            let stream = stream.clone();
            async move {
                let mut venue = store.aggregate_stream::<Venue>(&stream).await?;
                rename(&mut venue, "Ours").map_err(|_| EventStoreError::backend("rejected"))?;
                store.persist(&mut venue).await?;
                Ok::<_, EventStoreError>(venue.version())
            }
        })
        .await;

        assert_eq!(result.into_result().unwrap(), 3);
        let venue = store.aggregate_stream::<Venue>(&stream).await.unwrap();
        assert_eq!(venue.name, "Ours");
    }
}
