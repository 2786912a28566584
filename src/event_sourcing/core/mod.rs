// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// Works with ANY domain aggregate. No domain-specific code lives here.
//
// ============================================================================

pub mod aggregate;
pub mod errors;
pub mod event;

// Re-export core types for convenience
pub use aggregate::{Aggregate, EventSourced};
pub use errors::{AggregateError, EventStoreError, ProjectionError};
pub use event::{DomainEvent, EventEnvelope, EventMetadata, RawEnvelope, StreamId};
