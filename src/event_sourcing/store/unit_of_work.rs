use crate::event_sourcing::core::{
    Aggregate, DomainEvent, EventMetadata, EventSourced, EventStoreError, StreamId,
};

use super::event_log::{CommittedStream, StreamAppend};
use super::event_store::{stage, EventStore};

// ============================================================================
// Unit of Work - Multi-Stream, All-or-Nothing Commit
// ============================================================================
//
// Command handlers stage appends for one or more streams and commit them
// with a single `save_changes`. Either every staged stream is written or
// none is. Dropping a unit of work without saving discards what it staged.
//
// ============================================================================

pub struct UnitOfWork<'a> {
    store: &'a EventStore,
    staged: Vec<StreamAppend>,
}

impl<'a> UnitOfWork<'a> {
    pub(crate) fn new(store: &'a EventStore) -> Self {
        Self {
            store,
            staged: Vec::new(),
        }
    }

    pub fn append<E: DomainEvent>(
        &mut self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<E>,
    ) -> Result<&mut Self, EventStoreError> {
        self.append_with_metadata(stream_id, expected_version, events, &EventMetadata::default())
    }

    /// Stage events for a stream.
    ///
    /// A stream may be staged more than once as long as each later batch
    /// starts where the previously staged one ends.
    pub fn append_with_metadata<E: DomainEvent>(
        &mut self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<E>,
        metadata: &EventMetadata,
    ) -> Result<&mut Self, EventStoreError> {
        let batch = stage(stream_id, expected_version, events, metadata)?;

        match self.staged.iter_mut().find(|s| &s.stream_id == stream_id) {
            Some(existing) => {
                let staged_tail = existing.next_version();
                if staged_tail != expected_version {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id: stream_id.clone(),
                        expected: expected_version,
                        actual: staged_tail,
                    });
                }
                existing.events.extend(batch.events);
            }
            None => self.staged.push(batch),
        }

        Ok(self)
    }

    /// Stage the aggregate's queued events at its current version.
    ///
    /// The aggregate's version is not advanced; reload it if it is needed
    /// after the unit of work commits.
    pub fn append_aggregate<A: Aggregate>(
        &mut self,
        aggregate: &mut EventSourced<A>,
    ) -> Result<&mut Self, EventStoreError> {
        let expected_version = aggregate.version();
        let events = aggregate.dequeue_uncommitted_events();

        if events.is_empty() {
            return Ok(self);
        }

        self.append(aggregate.id(), expected_version, events)
    }

    pub fn staged_streams(&self) -> impl Iterator<Item = &StreamId> {
        self.staged.iter().map(|s| &s.stream_id)
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Commit every staged stream as one durable unit
    pub async fn save_changes(self) -> Result<Vec<CommittedStream>, EventStoreError> {
        if self.staged.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(stream_count = self.staged.len(), "Saving unit of work");
        self.store.commit(self.staged).await
    }
}
