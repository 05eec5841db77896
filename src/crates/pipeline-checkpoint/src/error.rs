//! Error types for snapshot persistence.

use thiserror::Error;

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while encoding, decoding, saving, or loading a
/// scheduler snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// A payload failed to encode to its textual representation.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// A binary (bincode) encode/decode step failed. Only produced when the
    /// `bincode-serializer` feature is enabled.
    #[cfg(feature = "bincode-serializer")]
    #[error("binary serialization error: {0}")]
    Binary(#[from] bincode::Error),

    /// Underlying storage (filesystem, in-memory map) failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O failure while reading or writing a snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot tree referenced a port key that the live topology does
    /// not have. Per the restore semantics in SPEC_FULL §4.6, this is
    /// warn-and-ignore at the call site rather than fatal; the variant
    /// exists so callers that want to surface it as an error still can.
    #[error("snapshot referenced unknown port key: {0}")]
    UnknownPortKey(String),

    /// No snapshot exists at the requested location.
    #[error("no snapshot found at {0}")]
    NotFound(String),
}
