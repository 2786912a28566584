use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;

use super::errors::{AggregateError, EventStoreError};
use super::event::{DomainEvent, EventEnvelope, StreamId};

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Replay and live mutation share one code path: `apply`
// 3. Mutations enqueue the causing event; the queue lives for one unit of work
// 4. `version` only advances for events that are durable
//
// Domain entities implement `Aggregate` (pure state transitions) and are
// composed into `EventSourced<A>`, which carries identity, version and the
// uncommitted-event queue.
//
// ============================================================================

/// Generic Aggregate trait - all event-sourced entities implement this
///
/// `apply` matches exhaustively over the entity's event enum. Variants the
/// entity does not understand must be answered with
/// [`AggregateError::unhandled`], never ignored.
pub trait Aggregate: Default + Send + Sync + 'static {
    type Event: DomainEvent;

    /// Name used in logs, metrics and error messages
    const AGGREGATE_TYPE: &'static str;

    /// Apply one event to in-memory state
    fn apply(&mut self, event: &Self::Event) -> Result<(), AggregateError>;
}

/// Event-sourced entity: domain state plus replay and mutation bookkeeping.
///
/// Not serializable: the uncommitted queue exists only for the unit of work
/// that owns the entity.
pub struct EventSourced<A: Aggregate> {
    id: StreamId,
    version: u64,
    state: A,
    uncommitted_events: VecDeque<A::Event>,
}

impl<A: Aggregate> EventSourced<A> {
    /// Fresh entity: version 0, default state, nothing queued
    pub fn new(id: impl Into<StreamId>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            state: A::default(),
            uncommitted_events: VecDeque::new(),
        }
    }

    /// Load aggregate from event history (reconstruct from events)
    ///
    /// Envelopes must be in ascending order starting right after version 0.
    pub fn load_from_events(
        id: impl Into<StreamId>,
        events: impl IntoIterator<Item = EventEnvelope<A::Event>>,
    ) -> Result<Self, EventStoreError> {
        let mut aggregate = Self::new(id);

        for envelope in events {
            aggregate.replay(&envelope)?;
        }

        if aggregate.version == 0 {
            return Err(EventStoreError::StreamNotFound(aggregate.id));
        }

        Ok(aggregate)
    }

    fn replay(&mut self, envelope: &EventEnvelope<A::Event>) -> Result<(), EventStoreError> {
        let expected = self.version + 1;
        if envelope.sequence_number != expected {
            return Err(EventStoreError::SequenceGap {
                stream_id: self.id.clone(),
                expected,
                found: envelope.sequence_number,
            });
        }

        self.apply(&envelope.event_data)?;
        self.version = expected;
        Ok(())
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Highest persisted sequence number reflected in state; the optimistic-concurrency token
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version the stream will have once the queued events are appended
    pub fn pending_version(&self) -> u64 {
        self.version + self.uncommitted_events.len() as u64
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Dispatch to the entity's handler. Mutates state, does not enqueue.
    pub fn apply(&mut self, event: &A::Event) -> Result<(), AggregateError> {
        self.state.apply(event)
    }

    /// Apply, then queue the event for persistence. Nothing is queued if apply fails.
    pub fn apply_and_enqueue(&mut self, event: A::Event) -> Result<(), AggregateError> {
        self.apply(&event)?;
        self.uncommitted_events.push_back(event);
        Ok(())
    }

    /// Hand the queued events over in enqueue order, leaving the queue empty
    pub fn dequeue_uncommitted_events(&mut self) -> Vec<A::Event> {
        self.uncommitted_events.drain(..).collect()
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted_events.is_empty()
    }

    /// Called by the store once an append of this entity's events is durable
    pub(crate) fn mark_persisted(&mut self, version: u64) {
        self.version = version;
    }
}

impl<A> fmt::Debug for EventSourced<A>
where
    A: Aggregate + fmt::Debug,
    A::Event: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSourced")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("uncommitted_events", &self.uncommitted_events)
            .finish()
    }
}

impl<A: Aggregate> Deref for EventSourced<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.state
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
