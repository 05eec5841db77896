//! The [`Payload`] trait every message type flowing through a pipeline must
//! implement, so ports and the snapshot engine can move, route, and persist
//! messages without runtime reflection.

use serde::Serialize;
use std::fmt::Debug;

/// A message type that can ride on a pipeline port.
///
/// `Payload` requires `Serialize` (so the snapshot engine can encode it to
/// the self-describing JSON form required by SPEC_FULL §4.6 and §9) plus
/// `Send + Sync + 'static` so it can cross the `TypeId`-keyed output routing
/// table untouched. Decoding is intentionally not part of this trait: a
/// snapshot is always restored against a concretely-typed port
/// (`InputPort<T>`), so decoding uses plain `serde_json::from_value::<T>`
/// at the call site instead of a trait-object-safe `decode`.
pub trait Payload: Serialize + Send + Sync + Debug + 'static {
    /// Encode this payload to its self-describing snapshot representation.
    fn encode(&self) -> crate::error::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl<T> Payload for T where T: Serialize + Send + Sync + Debug + 'static {}
