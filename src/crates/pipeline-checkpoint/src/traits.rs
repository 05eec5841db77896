//! Extensible snapshot storage trait for custom backend implementations.
//!
//! Mirrors the shape of a checkpoint-saver abstraction: a small async trait
//! that downstream crates can implement against Postgres, S3, or whatever
//! their deployment needs, with an in-memory and a filesystem reference
//! implementation provided here.

use crate::error::Result;
use crate::snapshot::SchedulerSnapshot;
use async_trait::async_trait;

/// Saves and restores [`SchedulerSnapshot`] trees.
///
/// Implementations must be `Send + Sync` so a single saver can be shared
/// across tasks. The trait is `async` even though the reference
/// [`crate::file::FileSnapshotSaver`] implementation performs synchronous
/// filesystem calls under `tokio::task::spawn_blocking` — the scheduler
/// itself runs single-threaded and cooperative (SPEC_FULL §5), but callers
/// should still be able to `.await` snapshot I/O without blocking a shared
/// executor.
#[async_trait]
pub trait SnapshotSaver: Send + Sync {
    /// Persist `snapshot` under `key` (an opaque saver-defined identifier:
    /// a directory path for [`crate::file::FileSnapshotSaver`], a map key
    /// for [`crate::memory::MemorySnapshotSaver`]).
    async fn save(&self, key: &str, snapshot: &SchedulerSnapshot) -> Result<()>;

    /// Load the snapshot previously stored under `key`, or `None` if
    /// nothing has been saved there yet.
    async fn load(&self, key: &str) -> Result<Option<SchedulerSnapshot>>;

    /// Remove any snapshot stored under `key`. A no-op if none exists.
    async fn delete(&self, key: &str) -> Result<()>;
}
