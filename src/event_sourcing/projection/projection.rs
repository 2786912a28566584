use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::event_sourcing::core::{DomainEvent, EventEnvelope, ProjectionError};
use crate::metrics::Metrics;

use super::keyed_lock::KeyedLocks;
use super::read_model_store::ReadModelStore;

// ============================================================================
// Projection Engine - Type-Routed Read Model Folds
// ============================================================================
//
// A projection owns one read model type `M` and folds a subset of the event
// types of `E` into it. Each event type is registered once with:
// - an id selector (which read model document the event touches)
// - a pure fold (old document, event payload) -> new document
//
// Handling an event is load -> fold -> save, serialized per read model id.
// Event types without a registration are skipped without touching the store.
//
// ============================================================================

/// A payload type that can be picked out of the event enum `E`.
///
/// `EVENT_TYPE` must equal what `E::event_type` returns for that variant.
pub trait EventVariant<E>: Send + Sync + 'static {
    const EVENT_TYPE: &'static str;

    fn from_event(event: &E) -> Option<&Self>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// No registration for the event's type; the store was not touched
    Skipped,
    Applied { read_model_id: String },
}

/// Both closures return `None` when the event is not the registered variant
struct Projector<E, M> {
    read_model_id: Box<dyn Fn(&E) -> Option<String> + Send + Sync>,
    fold: Box<dyn Fn(M, &E) -> Option<M> + Send + Sync>,
}

pub struct Projection<E, M> {
    name: String,
    store: Arc<dyn ReadModelStore<M>>,
    initial: Box<dyn Fn() -> M + Send + Sync>,
    projectors: HashMap<&'static str, Projector<E, M>>,
    locks: KeyedLocks,
    metrics: Option<Arc<Metrics>>,
}

impl<E, M> Projection<E, M>
where
    E: DomainEvent,
    M: Send + 'static,
{
    /// `initial` builds the document an event folds into when the store has none for its id
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ReadModelStore<M>>,
        initial: impl Fn() -> M + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            initial: Box::new(initial),
            projectors: HashMap::new(),
            locks: KeyedLocks::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register the fold for event payload type `T`
    pub fn projects<T>(
        &mut self,
        read_model_id: impl Fn(&T) -> String + Send + Sync + 'static,
        fold: impl Fn(M, &T) -> M + Send + Sync + 'static,
    ) -> Result<&mut Self, ProjectionError>
    where
        T: EventVariant<E>,
    {
        if self.projectors.contains_key(T::EVENT_TYPE) {
            return Err(ProjectionError::DuplicateRegistration {
                projection: self.name.clone(),
                event_type: T::EVENT_TYPE,
            });
        }

        let projector = Projector {
            read_model_id: Box::new(move |event: &E| {
                T::from_event(event).map(|payload| read_model_id(payload))
            }),
            fold: Box::new(move |model: M, event: &E| {
                T::from_event(event).map(|payload| fold(model, payload))
            }),
        };
        self.projectors.insert(T::EVENT_TYPE, projector);

        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.projectors.contains_key(event_type)
    }

    /// Fold one event into its read model
    pub async fn handle(&self, event: &E) -> Result<HandleOutcome, ProjectionError> {
        let event_type = event.event_type();

        let Some(projector) = self.projectors.get(event_type) else {
            if let Some(metrics) = &self.metrics {
                metrics
                    .projection_events_skipped
                    .with_label_values(&[self.name.as_str(), event_type])
                    .inc();
            }
            tracing::debug!(projection = %self.name, event_type, "Skipping unregistered event type");
            return Ok(HandleOutcome::Skipped);
        };

        let mismatch = || ProjectionError::VariantMismatch {
            projection: self.name.clone(),
            event_type,
        };
        let read_model_id = (projector.read_model_id)(event).ok_or_else(mismatch)?;

        let started = Instant::now();
        let _guard = self.locks.lock(&read_model_id).await;

        let current = match self.store.get(&read_model_id).await? {
            Some(model) => model,
            None => (self.initial)(),
        };
        let updated = (projector.fold)(current, event).ok_or_else(mismatch)?;
        self.store.put(&read_model_id, updated).await?;

        if let Some(metrics) = &self.metrics {
            metrics
                .projection_events_applied
                .with_label_values(&[self.name.as_str(), event_type])
                .inc();
            metrics
                .projection_fold_duration
                .with_label_values(&[self.name.as_str()])
                .observe(started.elapsed().as_secs_f64());
        }

        tracing::debug!(
            projection = %self.name,
            event_type,
            read_model_id = %read_model_id,
            "Projected event"
        );

        Ok(HandleOutcome::Applied { read_model_id })
    }

    pub async fn handle_envelope(
        &self,
        envelope: &EventEnvelope<E>,
    ) -> Result<HandleOutcome, ProjectionError> {
        self.handle(&envelope.event_data).await
    }
}
