// ============================================================================
// Projections - Read Models Derived From Events
// ============================================================================

mod keyed_lock;
#[allow(clippy::module_inception)]
mod projection;
mod read_model_store;

pub use keyed_lock::KeyedLocks;
pub use projection::{EventVariant, HandleOutcome, Projection};
pub use read_model_store::{InMemoryReadModelStore, ReadModelStore};
