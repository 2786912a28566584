// ============================================================================
// es_runtime - Event Sourcing Runtime
// ============================================================================
//
// - event_sourcing: aggregates, event store, units of work, projections
// - config: layered runtime configuration
// - telemetry: tracing bootstrap
// - metrics: Prometheus metrics for the store and projections
// - utils: caller-driven retry with backoff
//
// ============================================================================

pub mod config;
pub mod event_sourcing;
pub mod metrics;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use crate::config::{LoggingConfig, RetrySettings, RuntimeConfig, ScyllaConfig};
pub use event_sourcing::{
    Aggregate, AggregateError, CommittedStream, DomainEvent, EventEnvelope, EventLog,
    EventMetadata, EventSourced, EventStore, EventStoreError, EventVariant, HandleOutcome,
    InMemoryEventLog, InMemoryReadModelStore, Projection, ProjectionError, RawEnvelope,
    ReadModelStore, StreamId, UnitOfWork,
};
pub use metrics::Metrics;
