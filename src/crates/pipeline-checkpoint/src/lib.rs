//! # pipeline-checkpoint — snapshot persistence for the agent pipeline runtime
//!
//! Snapshots are **complete, self-describing records** of every agent's
//! private state and queued messages (SPEC_FULL §4.6). A
//! [`SnapshotSaver`] persists and restores the [`SchedulerSnapshot`] tree
//! that `pipeline-core`'s scheduler produces; this crate has no dependency
//! on `pipeline-core` so that new storage backends don't need to pull in
//! the scheduler itself.
//!
//! ## Core types
//!
//! - [`snapshot`] — [`SchedulerSnapshot`], [`AgentSnapshot`], [`PortSnapshot`],
//!   [`CollectorSnapshot`], [`EnvelopeSnapshot`]: the tree persisted as a
//!   whole.
//! - [`traits`] — the [`SnapshotSaver`] trait every backend implements.
//! - [`memory`] — [`MemorySnapshotSaver`], an in-process reference backend.
//! - [`file`] — [`FileSnapshotSaver`], a one-directory-per-key filesystem
//!   backend writing `state.json` (SPEC_FULL §6).
//! - [`payload`] — the [`Payload`] trait bounding every message type that
//!   can ride a pipeline port.
//! - [`serializer`] — byte-oriented [`SerializerProtocol`] for backends
//!   that want bytes instead of a `serde_json::Value` tree.
//! - [`error`] — [`SnapshotError`].
//!
//! ## Implementing a custom backend
//!
//! ```rust,ignore
//! use pipeline_checkpoint::{SnapshotSaver, SchedulerSnapshot, Result};
//! use async_trait::async_trait;
//!
//! struct S3SnapshotSaver { bucket: String }
//!
//! #[async_trait]
//! impl SnapshotSaver for S3SnapshotSaver {
//!     async fn save(&self, key: &str, snapshot: &SchedulerSnapshot) -> Result<()> {
//!         // PUT serde_json::to_vec(snapshot)? to s3://bucket/key/state.json
//!         Ok(())
//!     }
//!     async fn load(&self, key: &str) -> Result<Option<SchedulerSnapshot>> { Ok(None) }
//!     async fn delete(&self, key: &str) -> Result<()> { Ok(()) }
//! }
//! ```

pub mod error;
pub mod file;
pub mod memory;
pub mod payload;
pub mod serializer;
pub mod snapshot;
pub mod traits;

pub use error::{Result, SnapshotError};
pub use file::FileSnapshotSaver;
pub use memory::MemorySnapshotSaver;
pub use payload::Payload;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use snapshot::{
    AgentSnapshot, CollectorSnapshot, EnvelopeSnapshot, PortSnapshot, SchedulerSnapshot,
};
pub use traits::SnapshotSaver;
