//! Filesystem-backed [`SnapshotSaver`]: one directory per key, one
//! `state.json` file per directory (SPEC_FULL §4.6 / §6).

use crate::error::{Result, SnapshotError};
use crate::snapshot::SchedulerSnapshot;
use crate::traits::SnapshotSaver;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE_NAME: &str = "state.json";

/// Stores each snapshot as `<root>/<key>/state.json`.
///
/// Reads and writes run under [`tokio::task::spawn_blocking`] since
/// `std::fs` is synchronous and the scheduler's cooperative loop should
/// never block on disk I/O directly.
#[derive(Debug, Clone)]
pub struct FileSnapshotSaver {
    root: PathBuf,
}

impl FileSnapshotSaver {
    /// `root` is created on first `save` if it does not already exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn state_path(&self, key: &str) -> PathBuf {
        self.key_dir(key).join(SNAPSHOT_FILE_NAME)
    }
}

fn write_snapshot(path: &Path, snapshot: &SchedulerSnapshot) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<Option<SchedulerSnapshot>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SnapshotError::Io(e)),
    }
}

#[async_trait]
impl SnapshotSaver for FileSnapshotSaver {
    async fn save(&self, key: &str, snapshot: &SchedulerSnapshot) -> Result<()> {
        let path = self.state_path(key);
        let snapshot = snapshot.clone();
        tracing::debug!(key, path = %path.display(), "saving scheduler snapshot to disk");
        tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
            .await
            .map_err(|e| SnapshotError::Storage(e.to_string()))?
    }

    async fn load(&self, key: &str) -> Result<Option<SchedulerSnapshot>> {
        let path = self.state_path(key);
        tracing::debug!(key, path = %path.display(), "loading scheduler snapshot from disk");
        tokio::task::spawn_blocking(move || read_snapshot(&path))
            .await
            .map_err(|e| SnapshotError::Storage(e.to_string()))?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let dir = self.key_dir(key);
        tracing::debug!(key, dir = %dir.display(), "deleting scheduler snapshot directory");
        tokio::task::spawn_blocking(move || match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotError::Io(e)),
        })
        .await
        .map_err(|e| SnapshotError::Storage(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pipeline-checkpoint-test-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let root = temp_root("roundtrip");
        let saver = FileSnapshotSaver::new(&root);
        let snapshot = SchedulerSnapshot {
            is_active: true,
            step_counter: 3,
            ..SchedulerSnapshot::new()
        };

        saver.save("thread-a", &snapshot).await.unwrap();
        let loaded = saver.load("thread-a").await.unwrap().unwrap();
        assert_eq!(loaded.step_counter, 3);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn load_missing_key_returns_none() {
        let root = temp_root("missing");
        let saver = FileSnapshotSaver::new(&root);
        assert!(saver.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let root = temp_root("delete");
        let saver = FileSnapshotSaver::new(&root);
        saver.save("k", &SchedulerSnapshot::new()).await.unwrap();
        saver.delete("k").await.unwrap();
        saver.delete("k").await.unwrap();
        assert!(saver.load("k").await.unwrap().is_none());
    }
}
