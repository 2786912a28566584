use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::event_sourcing::core::{EventStoreError, RawEnvelope, StreamId};

// ============================================================================
// Event Log - Persistence Backend Contract
// ============================================================================
//
// The keyed, ordered log the event store writes through. A backend must:
// 1. Append conditionally: a stream's batch is written only if the stream
//    is still at `expected_version`
// 2. Apply every batch of one `append` call, or none of them
// 3. Read a stream back in ascending sequence order
//
// ============================================================================

/// Events staged for one stream, already numbered by the event store
#[derive(Debug, Clone)]
pub struct StreamAppend {
    pub stream_id: StreamId,
    pub expected_version: u64,
    pub events: Vec<RawEnvelope>,
}

impl StreamAppend {
    /// Version the stream reaches if this batch commits
    pub fn next_version(&self) -> u64 {
        self.expected_version.saturating_add(self.events.len() as u64)
    }

    /// Every envelope must belong to this stream and continue it without gaps,
    /// starting at `expected_version + 1`. Backends call this before writing.
    pub fn validate(&self) -> Result<(), EventStoreError> {
        let invalid = |reason: String| EventStoreError::InvalidAppend {
            stream_id: self.stream_id.clone(),
            reason,
        };

        if self.events.is_empty() {
            return Err(EventStoreError::EmptyAppend(self.stream_id.clone()));
        }

        let mut expected = self.expected_version;
        for envelope in &self.events {
            expected = expected.checked_add(1).ok_or_else(|| {
                invalid(format!(
                    "sequence numbers overflow after version {}",
                    self.expected_version
                ))
            })?;

            if envelope.stream_id != self.stream_id {
                return Err(invalid(format!(
                    "event {} is addressed to stream {}",
                    envelope.event_id, envelope.stream_id
                )));
            }
            if envelope.sequence_number != expected {
                return Err(invalid(format!(
                    "expected sequence number {expected}, found {}",
                    envelope.sequence_number
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedStream {
    pub stream_id: StreamId,
    pub version: u64,
    pub event_count: usize,
}

#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Atomically append every batch, or none of them
    async fn append(&self, appends: Vec<StreamAppend>) -> Result<Vec<CommittedStream>, EventStoreError>;

    /// All envelopes of a stream in ascending sequence order; empty if unknown
    async fn read_stream(&self, stream_id: &StreamId) -> Result<Vec<RawEnvelope>, EventStoreError>;

    /// Current tail sequence number, 0 for an unknown stream
    async fn stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError>;
}

// ============================================================================
// In-Memory Event Log
// ============================================================================
//
// Each stream sits behind its own async mutex so appends to different streams
// never wait on each other. The registry lock is only held to look up or
// create a stream handle.
//
// ============================================================================

type StreamHandle = Arc<Mutex<Vec<RawEnvelope>>>;

#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    streams: Arc<RwLock<HashMap<StreamId, StreamHandle>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn existing_handle(&self, stream_id: &StreamId) -> Option<StreamHandle> {
        self.streams.read().await.get(stream_id).cloned()
    }

    async fn handle_for(&self, stream_id: &StreamId) -> StreamHandle {
        if let Some(handle) = self.existing_handle(stream_id).await {
            return handle;
        }

        let mut streams = self.streams.write().await;
        streams.entry(stream_id.clone()).or_default().clone()
    }

    /// Drop registry entries a rejected append created and nobody else holds.
    ///
    /// Called with the stream guards still held; a handle referenced only by
    /// the registry and our guard has no appender waiting on it.
    async fn discard_unused(
        &self,
        appends: &[StreamAppend],
        guards: &[OwnedMutexGuard<Vec<RawEnvelope>>],
    ) {
        let mut streams = self.streams.write().await;
        for (append, guard) in appends.iter().zip(guards) {
            if guard.is_empty() && Arc::strong_count(OwnedMutexGuard::mutex(guard)) == 2 {
                streams.remove(&append.stream_id);
            }
        }
    }

    /// Number of streams holding at least one event
    pub async fn stream_count(&self) -> usize {
        let handles: Vec<StreamHandle> = self.streams.read().await.values().cloned().collect();
        let mut count = 0;
        for handle in handles {
            if !handle.lock().await.is_empty() {
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, mut appends: Vec<StreamAppend>) -> Result<Vec<CommittedStream>, EventStoreError> {
        // Lock in a global order so concurrent multi-stream appends cannot deadlock
        appends.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        if let Some(pair) = appends.windows(2).find(|pair| pair[0].stream_id == pair[1].stream_id) {
            return Err(EventStoreError::Backend(format!(
                "stream {} appears twice in one append",
                pair[0].stream_id
            )));
        }

        for append in &appends {
            append.validate()?;
        }

        let mut guards = Vec::with_capacity(appends.len());
        for append in &appends {
            let handle = self.handle_for(&append.stream_id).await;
            guards.push(handle.lock_owned().await);
        }

        // Validate everything before touching anything
        for (append, guard) in appends.iter().zip(&guards) {
            let actual = guard.len() as u64;
            if actual != append.expected_version {
                let conflict = EventStoreError::ConcurrencyConflict {
                    stream_id: append.stream_id.clone(),
                    expected: append.expected_version,
                    actual,
                };
                self.discard_unused(&appends, &guards).await;
                return Err(conflict);
            }
        }

        // No await below this point: the write is all-or-nothing even if the caller is cancelled
        let mut committed = Vec::with_capacity(appends.len());
        for (append, guard) in appends.into_iter().zip(guards.iter_mut()) {
            let version = append.next_version();
            let event_count = append.events.len();
            guard.extend(append.events);
            committed.push(CommittedStream {
                stream_id: append.stream_id,
                version,
                event_count,
            });
        }

        Ok(committed)
    }

    async fn read_stream(&self, stream_id: &StreamId) -> Result<Vec<RawEnvelope>, EventStoreError> {
        match self.existing_handle(stream_id).await {
            Some(handle) => Ok(handle.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        match self.existing_handle(stream_id).await {
            Some(handle) => Ok(handle.lock().await.len() as u64),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::EventEnvelope;
    use crate::test_support::{VenueEvent, VenueRenamed};
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn batch(stream: &str, expected_version: u64, count: u64) -> StreamAppend {
        let stream_id = StreamId::from(stream);
        let events = (1..=count)
            .map(|offset| {
                EventEnvelope::new(
                    stream_id.clone(),
                    expected_version + offset,
                    VenueEvent::Renamed(VenueRenamed {
                        name: format!("name-{offset}"),
                    }),
                    Uuid::new_v4(),
                    Utc::now(),
                )
                .encode()
                .unwrap()
            })
            .collect();

        StreamAppend {
            stream_id,
            expected_version,
            events,
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back_in_order() {
        let log = InMemoryEventLog::new();

        let committed = log.append(vec![batch("s1", 0, 3)]).await.unwrap();
        assert_eq!(committed[0].version, 3);
        assert_eq!(committed[0].event_count, 3);

        let events = log.read_stream(&StreamId::from("s1")).await.unwrap();
        let sequence: Vec<u64> = events.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequence, vec![1, 2, 3]);
        assert_eq!(log.stream_version(&StreamId::from("s1")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_stream_is_empty_at_version_zero() {
        let log = InMemoryEventLog::new();

        assert!(log.read_stream(&StreamId::from("nope")).await.unwrap().is_empty());
        assert_eq!(log.stream_version(&StreamId::from("nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_rejected() {
        let log = InMemoryEventLog::new();
        log.append(vec![batch("s1", 0, 1)]).await.unwrap();

        let result = log.append(vec![batch("s1", 0, 1)]).await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { expected: 0, actual: 1, .. })
        ));
        assert_eq!(log.stream_version(&StreamId::from("s1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_multi_stream_append_is_all_or_nothing() {
        let log = InMemoryEventLog::new();
        log.append(vec![batch("b", 0, 1)]).await.unwrap();

        // "a" would succeed, "b" is stale
        let result = log.append(vec![batch("a", 0, 2), batch("b", 0, 1)]).await;

        assert!(result.unwrap_err().is_concurrency_conflict());
        assert_eq!(log.stream_version(&StreamId::from("a")).await.unwrap(), 0);
        assert_eq!(log.stream_version(&StreamId::from("b")).await.unwrap(), 1);
        assert_eq!(log.stream_count().await, 1);
        assert!(!log.streams.read().await.contains_key(&StreamId::from("a")));
    }

    #[tokio::test]
    async fn test_rejected_append_leaves_no_registry_entry() {
        let log = InMemoryEventLog::new();

        let result = log.append(vec![batch("ghost", 3, 1)]).await;

        assert!(result.unwrap_err().is_concurrency_conflict());
        assert!(log.streams.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_envelopes_must_continue_the_stream() {
        let log = InMemoryEventLog::new();
        let stream = StreamId::from("s");

        let mut gap = batch("s", 0, 2);
        gap.events[1].sequence_number = 5;
        let mut foreign = batch("s", 0, 1);
        foreign.events[0].stream_id = StreamId::from("other");
        let overflow = StreamAppend {
            stream_id: stream.clone(),
            expected_version: u64::MAX,
            events: batch("s", 0, 1).events,
        };

        for append in [gap, foreign, overflow] {
            let result = log.append(vec![append]).await;
            assert!(matches!(result, Err(EventStoreError::InvalidAppend { .. })));
        }
        assert_eq!(log.stream_version(&stream).await.unwrap(), 0);
        assert!(log.read_stream(&StreamId::from("other")).await.unwrap().is_empty());

        log.append(vec![batch("s", 0, 1)]).await.unwrap();
        let events = log.read_stream(&stream).await.unwrap();
        assert_eq!(events.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_cancelled_multi_stream_append_writes_nothing() {
        let log = InMemoryEventLog::new();
        log.append(vec![batch("b", 0, 1)]).await.unwrap();

        // "a" is locked first, then the append waits on "b"
        let held = log.handle_for(&StreamId::from("b")).await.lock_owned().await;
        let pending = tokio::time::timeout(
            Duration::from_millis(20),
            log.append(vec![batch("a", 0, 2), batch("b", 1, 1)]),
        )
        .await;
        assert!(pending.is_err());
        drop(held);

        assert_eq!(log.stream_version(&StreamId::from("a")).await.unwrap(), 0);
        assert_eq!(log.stream_version(&StreamId::from("b")).await.unwrap(), 1);

        // The dropped append released "a"
        let retried = tokio::time::timeout(
            Duration::from_millis(100),
            log.append(vec![batch("a", 0, 1)]),
        )
        .await;
        assert_eq!(retried.unwrap().unwrap()[0].version, 1);
    }

    #[tokio::test]
    async fn test_duplicate_stream_in_one_append_is_rejected() {
        let log = InMemoryEventLog::new();

        let result = log.append(vec![batch("s1", 0, 1), batch("s1", 1, 1)]).await;

        assert!(matches!(result, Err(EventStoreError::Backend(_))));
        assert_eq!(log.stream_version(&StreamId::from("s1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_on_same_stream_have_one_winner() {
        let log = InMemoryEventLog::new();

        let (first, second) = tokio::join!(
            log.append(vec![batch("race", 0, 2)]),
            log.append(vec![batch("race", 0, 3)]),
        );

        assert!(first.is_ok() != second.is_ok());
        let winner_count = if first.is_ok() { 2 } else { 3 };
        let events = log.read_stream(&StreamId::from("race")).await.unwrap();
        assert_eq!(events.len(), winner_count);
        assert!(events.iter().enumerate().all(|(i, e)| e.sequence_number == i as u64 + 1));
    }
}
