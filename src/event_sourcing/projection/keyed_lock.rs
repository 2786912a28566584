use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle locks are dropped once the table grows past this many entries
const PRUNE_THRESHOLD: usize = 256;

/// One async mutex per key: holders of the same key run one at a time,
/// different keys never wait on each other.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the table itself references an idle lock
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_waits_for_holder() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("a").await;

        let second = tokio::time::timeout(Duration::from_millis(20), locks.lock("a")).await;
        assert!(second.is_err());

        drop(guard);
        assert!(tokio::time::timeout(Duration::from_millis(20), locks.lock("a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;

        let b = tokio::time::timeout(Duration::from_millis(20), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let locks = KeyedLocks::new();
        for i in 0..PRUNE_THRESHOLD {
            drop(locks.lock(&format!("key-{i}")).await);
        }
        assert_eq!(locks.len().await, PRUNE_THRESHOLD);

        let _held = locks.lock("fresh").await;
        assert_eq!(locks.len().await, 1);
    }
}
