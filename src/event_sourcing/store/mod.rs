// ============================================================================
// Event Sourcing Store - Persistence Layer
// ============================================================================
//
// `EventStore` is the facade command handlers use. It numbers and
// envelopes events, then hands fully staged appends to an `EventLog`
// backend, which owns durability and the optimistic concurrency check.
//
// ============================================================================

pub mod event_log;
pub mod event_store;
pub mod scylla;
pub mod unit_of_work;

pub use event_log::{CommittedStream, EventLog, InMemoryEventLog, StreamAppend};
pub use event_store::EventStore;
pub use self::scylla::{ScyllaEventLog, ScyllaReadModelStore};
pub use unit_of_work::UnitOfWork;
