//! The shared contract implemented by both agents and schedulers,
//! enabling nested-scheduler composition (SPEC_FULL §9).

use crate::error::Result;
use pipeline_checkpoint::AgentSnapshot;
use std::collections::HashMap;
use uuid::Uuid;

/// `{uuid, is_active, step()->bool, save_state()->snapshot,
/// load_state(snapshot)}` — the minimal surface the scheduler's
/// round-robin loop needs from anything it drives, whether a leaf agent
/// or a nested [`crate::scheduler::Scheduler`] (§9 "Nested schedulers").
///
/// The wiring/output-harvesting methods below default to "nothing to
/// report" so a bare `Schedulable` implementor still compiles; leaf
/// agents (`AgentRuntime`, `MultiInputAgent`) override them so
/// `Scheduler::validate_pipeline`/`get_final_outputs` (§4.5) see real
/// data.
pub trait Schedulable: Send {
    fn uuid(&self) -> Uuid;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// One cooperative turn. Returns `true` if work was done.
    fn step(&mut self) -> Result<bool>;

    fn save_state(&self) -> Result<AgentSnapshot>;

    fn load_state(&mut self, snapshot: &AgentSnapshot) -> Result<()>;

    /// Every agent uuid any of this agent's output connections target
    /// (§4.5 "Entry-agent detection", `validate_pipeline`).
    fn declared_target_uuids(&self) -> Vec<Uuid> {
        Vec::new()
    }

    /// True if this agent's declared input schema is the infinite-source
    /// sentinel (§4.5 "Entry-agent detection").
    fn is_infinite_source(&self) -> bool {
        false
    }

    /// This agent's `unconnected_outputs`, keyed by output port name
    /// (§4.5 "Output harvesting", `get_final_outputs`).
    fn final_outputs(&self) -> HashMap<String, Vec<serde_json::Value>> {
        HashMap::new()
    }

    /// Drains one item from the first non-empty `unconnected_outputs`
    /// buffer, returning `(port_name, payload)` (§4.5 `pop_one_output_for_agent`).
    fn pop_one_output(&mut self) -> Option<(String, serde_json::Value)> {
        None
    }

    /// Clears every output port's `unconnected_outputs` buffer (§4.5
    /// `step_all(clear_previous_outputs=true)`).
    fn clear_outputs(&mut self) {}
}
