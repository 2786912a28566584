use super::aggregate::Aggregate;
use super::event::{DomainEvent, StreamId};

// ============================================================================
// Event Sourcing Errors
// ============================================================================

/// Raised by an aggregate that has no handler for an event it was given.
///
/// This is a missing registration, not a recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("{aggregate_type} has no handler for event type {event_type}")]
    UnhandledEventType {
        aggregate_type: &'static str,
        event_type: &'static str,
    },
}

impl AggregateError {
    /// Catch-all answer for event variants an aggregate does not apply
    pub fn unhandled<A: Aggregate>(event: &A::Event) -> Self {
        Self::UnhandledEventType {
            aggregate_type: A::AGGREGATE_TYPE,
            event_type: event.event_type(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Expected version no longer matches; reload the aggregate and retry the command.
    #[error("Concurrency conflict on stream {stream_id}: expected version {expected}, but current is {actual}")]
    ConcurrencyConflict {
        stream_id: StreamId,
        expected: u64,
        actual: u64,
    },

    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    #[error("Cannot append empty event list to stream {0}")]
    EmptyAppend(StreamId),

    #[error("Stream {stream_id} is not contiguous: expected sequence {expected}, found {found}")]
    SequenceGap {
        stream_id: StreamId,
        expected: u64,
        found: u64,
    },

    /// The batch does not continue the stream: wrong stream id, gap, or version overflow
    #[error("Invalid append to stream {stream_id}: {reason}")]
    InvalidAppend { stream_id: StreamId, reason: String },

    #[error("Unit of work spans {0} streams; this backend commits a single stream atomically")]
    CrossStreamCommit(usize),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl EventStoreError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    pub(crate) fn backend(error: impl std::fmt::Display) -> Self {
        Self::Backend(error.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Read model store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Projection {projection} is registered for {event_type} but the event does not carry that variant")]
    VariantMismatch {
        projection: String,
        event_type: &'static str,
    },

    #[error("Projection {projection} already handles {event_type}")]
    DuplicateRegistration {
        projection: String,
        event_type: &'static str,
    },
}

impl ProjectionError {
    pub(crate) fn store(error: impl std::fmt::Display) -> Self {
        Self::Store(error.to_string())
    }
}
