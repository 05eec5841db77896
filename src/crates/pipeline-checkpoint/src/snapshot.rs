//! The snapshot tree: a complete, self-contained record of every agent's
//! state and queued messages, sufficient to resume a pipeline exactly where
//! it stopped (SPEC_FULL §4.6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One queued or harvested message, in its textual snapshot form.
///
/// `parents` stores the canonical `"uuid:index:fanout"` strings produced by
/// `ProvenanceSegment::Display` in `pipeline-core` rather than the typed
/// value, since this crate has no dependency on `pipeline-core` and the
/// string form round-trips losslessly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSnapshot {
    pub parents: Vec<String>,
    pub timestamp_ms: i64,
    pub correlation_id: Option<String>,
    pub payload: serde_json::Value,
}

/// Snapshot of a single port: its pending queue plus, for output ports with
/// no wiring, the `unconnected_outputs` harvest buffer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PortSnapshot {
    pub queue: Vec<EnvelopeSnapshot>,
    #[serde(default)]
    pub unconnected_outputs: Vec<EnvelopeSnapshot>,
}

/// Snapshot of a list-collector port's partial buffers, keyed by the shared
/// provenance prefix (the parents list with the final segment stripped,
/// joined with `"|"`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CollectorSnapshot {
    pub partial_buffers: HashMap<String, Vec<EnvelopeSnapshot>>,
}

/// Snapshot of one agent: its private state, activity flag, and every port
/// keyed by the stable port-key convention from SPEC_FULL §4.6
/// (`"input_port"`, `"input_<i>"`, `"output_ports:<SchemaName>"`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentSnapshot {
    pub state: serde_json::Value,
    pub is_active: bool,
    pub ports: HashMap<String, PortSnapshot>,
    #[serde(default)]
    pub collectors: HashMap<String, CollectorSnapshot>,
}

/// The top-level snapshot tree persisted and restored by a
/// [`crate::traits::SnapshotSaver`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerSnapshot {
    pub is_active: bool,
    pub agent_idx: usize,
    pub step_counter: u64,
    pub all_done_counter: usize,
    pub global_state: Option<serde_json::Value>,
    /// Keyed by agent uuid. Agents present in the live topology but absent
    /// here keep their fresh state; entries for agents absent from the live
    /// topology are ignored on restore (SPEC_FULL §4.6 "Restore semantics").
    pub agents: HashMap<String, AgentSnapshot>,
}

impl SchedulerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }
}
