// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing runtime:
// - core: events, envelopes, aggregates and errors
// - store: append/load with optimistic concurrency and units of work
// - projection: type-routed folds into keyed read models
//
// ============================================================================

pub mod core;
pub mod projection;
pub mod store;

pub use self::core::*;
pub use projection::*;
pub use store::*;
