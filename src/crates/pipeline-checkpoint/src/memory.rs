//! In-memory [`SnapshotSaver`] for development, tests, and short-lived runs.

use crate::error::Result;
use crate::snapshot::SchedulerSnapshot;
use crate::traits::SnapshotSaver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Storage = Arc<RwLock<HashMap<String, SchedulerSnapshot>>>;

/// Reference [`SnapshotSaver`] backed by a shared `HashMap`. Cloning shares
/// the same underlying storage, so a single saver can be handed to multiple
/// schedulers that checkpoint under distinct keys.
#[derive(Clone, Default)]
pub struct MemorySnapshotSaver {
    storage: Storage,
}

impl MemorySnapshotSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys currently stored.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every stored snapshot. Useful for test isolation.
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl SnapshotSaver for MemorySnapshotSaver {
    async fn save(&self, key: &str, snapshot: &SchedulerSnapshot) -> Result<()> {
        tracing::debug!(key, step_counter = snapshot.step_counter, "saving scheduler snapshot to memory");
        self.storage
            .write()
            .await
            .insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<SchedulerSnapshot>> {
        let found = self.storage.read().await.get(key).cloned();
        tracing::debug!(key, found = found.is_some(), "loading scheduler snapshot from memory");
        Ok(found)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tracing::debug!(key, "deleting scheduler snapshot from memory");
        self.storage.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let saver = MemorySnapshotSaver::new();
        let snapshot = SchedulerSnapshot {
            is_active: true,
            agent_idx: 2,
            step_counter: 7,
            ..SchedulerSnapshot::new()
        };

        saver.save("session-1", &snapshot).await.unwrap();

        let loaded = saver.load("session-1").await.unwrap().unwrap();
        assert_eq!(loaded.agent_idx, 2);
        assert_eq!(loaded.step_counter, 7);
        assert_eq!(saver.len().await, 1);
    }

    #[tokio::test]
    async fn load_missing_key_returns_none() {
        let saver = MemorySnapshotSaver::new();
        assert!(saver.load("no-such-key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let saver = MemorySnapshotSaver::new();
        saver.save("a", &SchedulerSnapshot::new()).await.unwrap();
        assert_eq!(saver.len().await, 1);

        saver.delete("a").await.unwrap();
        assert!(saver.is_empty().await);
        assert!(saver.load("a").await.unwrap().is_none());
    }
}
