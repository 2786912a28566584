use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use uuid::Uuid;

use crate::event_sourcing::core::{
    Aggregate, DomainEvent, EventEnvelope, EventMetadata, EventSourced, EventStoreError, StreamId,
};
use crate::metrics::Metrics;

use super::event_log::{CommittedStream, EventLog, InMemoryEventLog, StreamAppend};
use super::unit_of_work::UnitOfWork;

// ============================================================================
// Generic Event Store - Repository for Events
// ============================================================================
//
// Works with ANY event type: every operation is generic over the event or
// aggregate it reads and writes, so one store (and one unit of work) can
// serve several aggregate types.
//
// Responsibilities:
// 1. Number new events and append them under optimistic concurrency
// 2. Load event history and rehydrate aggregates
// 3. Commit multi-stream units of work all-or-nothing
//
// The compare-and-swap itself is the backend's job (see `EventLog`).
//
// ============================================================================

#[derive(Clone)]
pub struct EventStore {
    log: Arc<dyn EventLog>,
    metrics: Option<Arc<Metrics>>,
}

impl EventStore {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log, metrics: None }
    }

    /// Store backed by an [`InMemoryEventLog`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventLog::new()))
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Append events to a stream
    /// Returns the new version number after appending
    pub async fn append<E: DomainEvent>(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<E>,
    ) -> Result<u64, EventStoreError> {
        self.append_with_metadata(stream_id, expected_version, events, &EventMetadata::default())
            .await
    }

    pub async fn append_with_metadata<E: DomainEvent>(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<E>,
        metadata: &EventMetadata,
    ) -> Result<u64, EventStoreError> {
        let batch = stage(stream_id, expected_version, events, metadata)?;
        let committed = self.commit(vec![batch]).await?;

        committed
            .into_iter()
            .next()
            .map(|stream| stream.version)
            .ok_or_else(|| EventStoreError::Backend("event log acknowledged no streams".to_string()))
    }

    /// Drain the aggregate's queued events and append them at its current version.
    ///
    /// On success the aggregate's version advances to the new stream version.
    /// On failure the drained events are gone; reload the aggregate and rerun
    /// the command.
    pub async fn persist<A: Aggregate>(
        &self,
        aggregate: &mut EventSourced<A>,
    ) -> Result<u64, EventStoreError> {
        let expected_version = aggregate.version();
        let events = aggregate.dequeue_uncommitted_events();

        if events.is_empty() {
            tracing::debug!(stream_id = %aggregate.id(), "Nothing to persist");
            return Ok(expected_version);
        }

        let new_version = self.append(aggregate.id(), expected_version, events).await?;
        aggregate.mark_persisted(new_version);
        Ok(new_version)
    }

    /// Load all events for a stream
    pub async fn load_events<E: DomainEvent>(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<EventEnvelope<E>>, EventStoreError> {
        let raw = self.log.read_stream(stream_id).await?;

        let events = raw
            .into_iter()
            .map(|envelope| envelope.decode::<E>())
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("Loaded {} events for stream {}", events.len(), stream_id);
        Ok(events)
    }

    /// Get current version of stream
    pub async fn stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        self.log.stream_version(stream_id).await
    }

    /// Check if stream exists
    pub async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool, EventStoreError> {
        Ok(self.stream_version(stream_id).await? > 0)
    }

    /// Replay a stream into a fresh aggregate
    pub async fn aggregate_stream<A: Aggregate>(
        &self,
        stream_id: &StreamId,
    ) -> Result<EventSourced<A>, EventStoreError> {
        let events = self.load_events::<A::Event>(stream_id).await?;

        if events.is_empty() {
            return Err(EventStoreError::StreamNotFound(stream_id.clone()));
        }

        let aggregate = EventSourced::<A>::load_from_events(stream_id.clone(), events)?;

        if let Some(metrics) = &self.metrics {
            metrics
                .streams_rehydrated
                .with_label_values(&[A::AGGREGATE_TYPE])
                .inc();
        }

        tracing::debug!(
            stream_id = %stream_id,
            aggregate_type = A::AGGREGATE_TYPE,
            version = aggregate.version(),
            "Rehydrated aggregate"
        );

        Ok(aggregate)
    }

    /// Start a unit of work; nothing is written until `save_changes`
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self)
    }

    pub(crate) async fn commit(
        &self,
        appends: Vec<StreamAppend>,
    ) -> Result<Vec<CommittedStream>, EventStoreError> {
        let started = Instant::now();
        let stream_count = appends.len();

        match self.log.append(appends).await {
            Ok(committed) => {
                let event_count: usize = committed.iter().map(|s| s.event_count).sum();

                if let Some(metrics) = &self.metrics {
                    metrics.events_appended.inc_by(event_count as u64);
                    metrics
                        .append_duration
                        .observe(started.elapsed().as_secs_f64());
                }

                for stream in &committed {
                    tracing::info!(
                        stream_id = %stream.stream_id,
                        new_version = stream.version,
                        event_count = stream.event_count,
                        "✅ Appended events to event store"
                    );
                }

                Ok(committed)
            }
            Err(error) => {
                if error.is_concurrency_conflict() {
                    if let Some(metrics) = &self.metrics {
                        metrics.concurrency_conflicts.inc();
                    }
                    tracing::warn!(error = %error, stream_count, "Append rejected");
                } else {
                    tracing::error!(error = %error, stream_count, "Append failed");
                }
                Err(error)
            }
        }
    }
}

/// Number and encode events for one stream; sequence numbers start at `expected_version + 1`
pub(crate) fn stage<E: DomainEvent>(
    stream_id: &StreamId,
    expected_version: u64,
    events: Vec<E>,
    metadata: &EventMetadata,
) -> Result<StreamAppend, EventStoreError> {
    if events.is_empty() {
        return Err(EventStoreError::EmptyAppend(stream_id.clone()));
    }
    if expected_version.checked_add(events.len() as u64).is_none() {
        return Err(EventStoreError::InvalidAppend {
            stream_id: stream_id.clone(),
            reason: format!(
                "{} events after version {expected_version} overflow the sequence",
                events.len()
            ),
        });
    }

    let correlation_id = metadata.correlation_id.unwrap_or_else(Uuid::new_v4);
    let occurred_at = Utc::now();

    let mut envelopes = Vec::with_capacity(events.len());
    let mut sequence_number = expected_version;

    for event in events {
        sequence_number += 1;
        let envelope = EventEnvelope::new(
            stream_id.clone(),
            sequence_number,
            event,
            correlation_id,
            occurred_at,
        )
        .with_metadata(metadata)
        .encode()?;
        envelopes.push(envelope);
    }

    Ok(StreamAppend {
        stream_id: stream_id.clone(),
        expected_version,
        events: envelopes,
    })
}

// ============================================================================
// Unit Tests
// ============================================================================
