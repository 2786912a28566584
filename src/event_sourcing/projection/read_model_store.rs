use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::event_sourcing::core::ProjectionError;

/// Keyed document store a projection folds into.
///
/// `put` must be atomic per key; no cross-key transactions are assumed.
#[async_trait]
pub trait ReadModelStore<M>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<M>, ProjectionError>;

    async fn put(&self, id: &str, model: M) -> Result<(), ProjectionError>;
}

/// In-memory read model store for tests and single-process deployments.
///
/// Clones share the same documents.
#[derive(Debug)]
pub struct InMemoryReadModelStore<M> {
    documents: Arc<RwLock<HashMap<String, M>>>,
}

impl<M> InMemoryReadModelStore<M> {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.documents.read().await.contains_key(id)
    }
}

impl<M: Clone> InMemoryReadModelStore<M> {
    /// Copy of the current document, if any
    pub async fn snapshot(&self, id: &str) -> Option<M> {
        self.documents.read().await.get(id).cloned()
    }
}

impl<M> Clone for InMemoryReadModelStore<M> {
    fn clone(&self) -> Self {
        Self {
            documents: Arc::clone(&self.documents),
        }
    }
}

impl<M> Default for InMemoryReadModelStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M> ReadModelStore<M> for InMemoryReadModelStore<M>
where
    M: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Result<Option<M>, ProjectionError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn put(&self, id: &str, model: M) -> Result<(), ProjectionError> {
        self.documents.write().await.insert(id.to_string(), model);
        Ok(())
    }
}
