//! Multi-input agent: N typed input ports, round-robin or
//! provenance-aligned aggregate dispatch (SPEC_FULL §4.3).

use crate::agent::{route_to_ports, ErasedOutputPort, RunOutput};
use crate::error::{PipelineError, Result};
use crate::port::{Envelope, InputPort, SharedInputPort};
use crate::provenance::ProvenanceChain;
use crate::schedulable::Schedulable;
use pipeline_checkpoint::{AgentSnapshot, Payload, PortSnapshot};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use uuid::Uuid;

/// One named input slot of a [`MultiInputAgent`]. Payloads are boxed
/// behind JSON so ports of different concrete types can share one `Vec`
/// in declaration order (port 0 is always the aggregate-mode anchor,
/// §4.3 [ADDED]).
pub trait ErasedInputPort: Send {
    fn type_id(&self) -> TypeId;
    fn name(&self) -> &str;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn peek_parents(&self, index: usize) -> Option<ProvenanceChain>;
    fn pop_front_json(&mut self) -> Option<(ProvenanceChain, Option<String>, serde_json::Value)>;
    fn remove_json(&mut self, index: usize) -> Option<(ProvenanceChain, Option<String>, serde_json::Value)>;
    fn insert_json(&mut self, index: usize, parents: ProvenanceChain, correlation_id: Option<String>, payload: serde_json::Value);
    fn snapshot_queue(&self) -> Result<Vec<pipeline_checkpoint::EnvelopeSnapshot>>;
    fn restore_queue(&mut self, queue: &[pipeline_checkpoint::EnvelopeSnapshot]) -> Result<()>;
    /// Downcasting hook so `AgentRuntime::connect_to_slot` can resolve the
    /// concrete [`SharedInputPort<T>`] behind a named slot.
    fn as_any(&self) -> &dyn Any;
}

pub struct TypedInputSlot<T> {
    name: String,
    port: SharedInputPort<T>,
}

impl<T: Payload + Clone> TypedInputSlot<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: InputPort::new_shared(),
        }
    }

    /// The shared handle an upstream `AgentRuntime::connect_to_slot` wires
    /// its output port to (§6 "Wiring API").
    pub fn handle(&self) -> SharedInputPort<T> {
        std::sync::Arc::clone(&self.port)
    }

    pub fn port(&self) -> std::sync::MutexGuard<'_, InputPort<T>> {
        self.port.lock().expect("input port mutex poisoned")
    }
}

impl<T: Payload + Clone + for<'de> serde::Deserialize<'de>> ErasedInputPort for TypedInputSlot<T> {
    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.port.lock().expect("input port mutex poisoned").len()
    }

    fn peek_parents(&self, index: usize) -> Option<ProvenanceChain> {
        self.port
            .lock()
            .expect("input port mutex poisoned")
            .peek(index)
            .map(|env| env.parents.clone())
    }

    fn pop_front_json(&mut self) -> Option<(ProvenanceChain, Option<String>, serde_json::Value)> {
        let env = self.port.lock().expect("input port mutex poisoned").pop_front()?;
        serde_json::to_value(&env.payload)
            .ok()
            .map(|v| (env.parents, env.correlation_id, v))
    }

    fn remove_json(&mut self, index: usize) -> Option<(ProvenanceChain, Option<String>, serde_json::Value)> {
        let env = self.port.lock().expect("input port mutex poisoned").remove(index)?;
        serde_json::to_value(&env.payload)
            .ok()
            .map(|v| (env.parents, env.correlation_id, v))
    }

    fn insert_json(
        &mut self,
        index: usize,
        parents: ProvenanceChain,
        correlation_id: Option<String>,
        payload: serde_json::Value,
    ) {
        if let Ok(payload) = serde_json::from_value(payload) {
            self.port.lock().expect("input port mutex poisoned").insert(
                index,
                Envelope {
                    parents,
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    correlation_id,
                    payload,
                },
            );
        }
    }

    fn snapshot_queue(&self) -> Result<Vec<pipeline_checkpoint::EnvelopeSnapshot>> {
        self.port
            .lock()
            .expect("input port mutex poisoned")
            .iter()
            .map(|env| {
                Ok(pipeline_checkpoint::EnvelopeSnapshot {
                    parents: env.parents.to_strings(),
                    timestamp_ms: env.timestamp_ms,
                    correlation_id: env.correlation_id.clone(),
                    payload: serde_json::to_value(&env.payload)?,
                })
            })
            .collect()
    }

    fn restore_queue(&mut self, queue: &[pipeline_checkpoint::EnvelopeSnapshot]) -> Result<()> {
        let mut port = self.port.lock().expect("input port mutex poisoned");
        *port = InputPort::new();
        for env in queue {
            let parents = ProvenanceChain::from_strings(&env.parents)
                .map_err(|e| PipelineError::Validation(e.to_string()))?;
            let payload: T = serde_json::from_value(env.payload.clone())?;
            port.receive(
                Envelope {
                    parents,
                    timestamp_ms: env.timestamp_ms,
                    correlation_id: env.correlation_id.clone(),
                    payload,
                },
                None,
            )?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A dequeued envelope presented to `run` as `{schema → payload}`, keyed
/// by the declared input port name.
pub type JoinedInput = HashMap<String, serde_json::Value>;

/// Domain contract for a [`MultiInputAgent`] (§4.3). Mirrors [`crate::agent::Agent`]
/// but takes the joined `{schema → payload}` map both dispatch modes
/// assemble before invoking it.
pub trait MultiInputLogic: Send {
    fn run(&mut self, input: JoinedInput, correlation_id: Option<&str>) -> Result<RunOutput>;

    fn state_snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn restore_state(&mut self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// N typed input ports operating in round-robin or provenance-aligned
/// aggregate mode (§4.3).
///
/// Grounded directly on
/// `original_source/AgentFramework/core/MultiPortAgent.py`'s `step()`:
/// both dispatch modes dequeue, invoke `process` (here: `MultiInputLogic::run`),
/// emit with `join_parents`, and roll the dequeued envelope(s) back to
/// their original queue position(s) if `run` raises.
pub struct MultiInputAgent {
    uuid: Uuid,
    aggregate: bool,
    ports: Vec<Box<dyn ErasedInputPort>>,
    rr_cursor: usize,
    logic: Box<dyn MultiInputLogic>,
    output_ports: HashMap<TypeId, Box<dyn ErasedOutputPort>>,
    single_output_fallback: Option<TypeId>,
    is_active: bool,
}

impl MultiInputAgent {
    pub fn new(uuid: Uuid, aggregate: bool, ports: Vec<Box<dyn ErasedInputPort>>, logic: Box<dyn MultiInputLogic>) -> Self {
        Self {
            uuid,
            aggregate,
            ports,
            rr_cursor: 0,
            logic,
            output_ports: HashMap::new(),
            single_output_fallback: None,
            is_active: true,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    pub fn ports(&self) -> &[Box<dyn ErasedInputPort>] {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut [Box<dyn ErasedInputPort>] {
        &mut self.ports
    }

    pub fn add_output_port(&mut self, port: Box<dyn ErasedOutputPort>) -> &mut Self {
        let type_id = port.type_id();
        self.output_ports.insert(type_id, port);
        if self.output_ports.len() == 1 {
            self.single_output_fallback = Some(type_id);
        } else {
            self.single_output_fallback = None;
        }
        self
    }

    /// Resolves the shared handle behind the named input slot, used by
    /// `AgentRuntime::connect_to_slot` (§6 "Wiring API").
    pub fn port_handle<T: Payload + Clone>(&self, name: &str) -> Option<SharedInputPort<T>> {
        self.ports
            .iter()
            .find(|p| p.name() == name)?
            .as_any()
            .downcast_ref::<TypedInputSlot<T>>()
            .map(|slot| slot.handle())
    }

    /// Round-robin mode: probe ports starting at `(last+1) mod N`; pop
    /// the first non-empty one.
    pub fn try_round_robin(&mut self) -> Option<(String, ProvenanceChain, Option<String>, serde_json::Value)> {
        if self.ports.is_empty() {
            return None;
        }
        let n = self.ports.len();
        for offset in 0..n {
            let idx = (self.rr_cursor + 1 + offset) % n;
            if !self.ports[idx].is_empty() {
                self.rr_cursor = idx;
                let name = self.ports[idx].name().to_string();
                let (parents, correlation_id, payload) = self.ports[idx].pop_front_json()?;
                return Some((name, parents, correlation_id, payload));
            }
        }
        None
    }

    /// Aggregate mode: finds an alignment per Alignment rule A across all
    /// ports, anchored on port 0. Returns `None` (no dequeue, no mutation)
    /// if any port lacks an aligned partner.
    fn find_alignment(&self) -> Option<Vec<usize>> {
        if self.ports.is_empty() || self.ports[0].is_empty() {
            return None;
        }
        let anchor_parents = self.ports[0].peek_parents(0)?;
        let mut indices = vec![0usize];
        for port in &self.ports[1..] {
            let mut found = None;
            for k in 0..port.len() {
                let candidate = port.peek_parents(k)?;
                if anchor_parents.fanout_suffixes_subset_of(&candidate) {
                    found = Some(k);
                    break;
                }
            }
            indices.push(found?);
        }
        Some(indices)
    }

    /// Dequeues an aligned set and returns `(joined_input, join_parents,
    /// per_port_original_chains, correlation_id, rollback_entries)`. On
    /// any subsequent error the caller must call [`MultiInputAgent::rollback`]
    /// with the same values to restore the original queue order (§4.3
    /// error rollback, property 9).
    pub fn try_aggregate(
        &mut self,
    ) -> Result<Option<(JoinedInput, ProvenanceChain, Vec<ProvenanceChain>, Option<String>, Vec<(usize, usize)>)>> {
        let Some(indices) = self.find_alignment() else {
            return Ok(None);
        };

        let mut joined = JoinedInput::new();
        let mut chains = Vec::with_capacity(indices.len());
        let mut correlation_id = None;
        let mut rollback_entries = Vec::with_capacity(indices.len());

        for (port_idx, &queue_idx) in indices.iter().enumerate() {
            let name = self.ports[port_idx].name().to_string();
            let (parents, corr, payload) = self.ports[port_idx]
                .remove_json(queue_idx)
                .ok_or_else(|| PipelineError::Scheduler("alignment index vanished during dequeue".to_string()))?;
            chains.push(parents);
            correlation_id = correlation_id.or(corr);
            joined.insert(name, payload);
            rollback_entries.push((port_idx, queue_idx));
        }

        let join_parents = ProvenanceChain::common_prefix(&chains);
        Ok(Some((joined, join_parents, chains, correlation_id, rollback_entries)))
    }

    /// Re-inserts dequeued envelopes at their original indices (§4.3
    /// error rollback, aggregate mode). Single-threaded only — see
    /// SPEC_FULL §9 Open Questions: this invariant assumes no concurrent
    /// mutation of these queues between dequeue and rollback, which holds
    /// for the cooperative, single-threaded scheduler this crate
    /// provides.
    pub fn rollback(
        &mut self,
        entries: Vec<(usize, usize)>,
        joined: JoinedInput,
        chains: Vec<ProvenanceChain>,
        correlation_id: Option<String>,
    ) {
        for (i, (port_idx, queue_idx)) in entries.into_iter().enumerate() {
            let name = self.ports[port_idx].name().to_string();
            if let Some(payload) = joined.get(&name).cloned() {
                let parents = chains.get(i).cloned().unwrap_or_default();
                self.ports[port_idx].insert_json(queue_idx, parents, correlation_id.clone(), payload);
            }
        }
    }

    fn route(&mut self, output: RunOutput, parents: &ProvenanceChain) -> Result<()> {
        route_to_ports(&mut self.output_ports, self.single_output_fallback, output, parents, self.uuid)
    }

    /// One cooperative turn (§4.3): dequeue (round-robin or aggregate),
    /// invoke `run`, route its output with `join_parents`, and roll the
    /// dequeue back on error — mirroring
    /// `original_source/AgentFramework/core/MultiPortAgent.py`'s `step()`,
    /// whose `except` branch reinserts staged items for BOTH dispatch
    /// modes, not aggregate mode alone.
    pub fn step(&mut self) -> Result<bool> {
        if !self.is_active {
            return Ok(false);
        }

        if self.aggregate {
            let Some((joined, join_parents, chains, correlation_id, rollback_entries)) = self.try_aggregate()? else {
                return Ok(false);
            };
            match self.logic.run(joined.clone(), correlation_id.as_deref()) {
                Ok(output) => {
                    self.route(output, &join_parents)?;
                    Ok(true)
                }
                Err(e) => {
                    self.rollback(rollback_entries, joined, chains, correlation_id);
                    Err(e)
                }
            }
        } else {
            let Some((name, parents, correlation_id, payload)) = self.try_round_robin() else {
                return Ok(false);
            };
            let mut joined = JoinedInput::new();
            joined.insert(name.clone(), payload.clone());
            match self.logic.run(joined, correlation_id.as_deref()) {
                Ok(output) => {
                    self.route(output, &parents)?;
                    Ok(true)
                }
                Err(e) => {
                    if let Some(port_idx) = self.ports.iter().position(|p| p.name() == name) {
                        self.ports[port_idx].insert_json(0, parents, correlation_id, payload);
                    }
                    Err(e)
                }
            }
        }
    }

    pub fn snapshot(&self) -> Result<AgentSnapshot> {
        let mut ports = HashMap::new();
        for (i, port) in self.ports.iter().enumerate() {
            ports.insert(
                format!("input_{i}"),
                PortSnapshot {
                    queue: port.snapshot_queue()?,
                    unconnected_outputs: Vec::new(),
                },
            );
        }
        for port in self.output_ports.values() {
            ports.insert(format!("output_ports:{}", port.name()), port.snapshot()?);
        }
        Ok(AgentSnapshot {
            state: self.logic.state_snapshot(),
            is_active: self.is_active,
            ports,
            collectors: HashMap::new(),
        })
    }

    pub fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()> {
        self.is_active = snapshot.is_active;
        self.logic.restore_state(snapshot.state.clone())?;
        for (i, port) in self.ports.iter_mut().enumerate() {
            if let Some(port_snapshot) = snapshot.ports.get(&format!("input_{i}")) {
                port.restore_queue(&port_snapshot.queue)?;
            }
        }
        Ok(())
    }
}

impl Schedulable for MultiInputAgent {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    fn step(&mut self) -> Result<bool> {
        MultiInputAgent::step(self)
    }

    fn save_state(&self) -> Result<AgentSnapshot> {
        self.snapshot()
    }

    fn load_state(&mut self, snapshot: &AgentSnapshot) -> Result<()> {
        self.restore(snapshot)
    }

    fn declared_target_uuids(&self) -> Vec<Uuid> {
        self.output_ports.values().flat_map(|p| p.connected_target_agents()).collect()
    }

    fn final_outputs(&self) -> HashMap<String, Vec<serde_json::Value>> {
        self.output_ports
            .values()
            .map(|p| (p.name().to_string(), p.unconnected_outputs_json()))
            .collect()
    }

    fn pop_one_output(&mut self) -> Option<(String, serde_json::Value)> {
        for port in self.output_ports.values_mut() {
            if let Some(value) = port.pop_one_unconnected_output_json() {
                return Some((port.name().to_string(), value));
            }
        }
        None
    }

    fn clear_outputs(&mut self) {
        for port in self.output_ports.values_mut() {
            port.clear_unconnected_outputs_json();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct A(i32);
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct B(i32);

    struct Echo;
    impl MultiInputLogic for Echo {
        fn run(&mut self, input: JoinedInput, _correlation_id: Option<&str>) -> Result<RunOutput> {
            Ok(RunOutput::One(crate::agent::BoxedPayload::new(serde_json::to_string(&input).unwrap())))
        }
    }

    struct Failing;
    impl MultiInputLogic for Failing {
        fn run(&mut self, _input: JoinedInput, _correlation_id: Option<&str>) -> Result<RunOutput> {
            Err(PipelineError::Validation("boom".to_string()))
        }
    }

    #[test]
    fn round_robin_cycles_through_nonempty_ports() {
        let mut agent = MultiInputAgent::new(
            Uuid::new_v4(),
            false,
            vec![
                Box::new(TypedInputSlot::<A>::new("a")),
                Box::new(TypedInputSlot::<B>::new("b")),
            ],
            Box::new(Echo),
        );
        assert!(agent.try_round_robin().is_none());
    }

    #[test]
    fn aggregate_join_waits_for_alignment_on_both_ports() {
        let a_slot = TypedInputSlot::<A>::new("a");
        a_slot
            .handle()
            .lock()
            .unwrap()
            .receive(Envelope::new(ProvenanceChain::new(), None, A(1)), None)
            .unwrap();

        let mut agent = MultiInputAgent::new(
            Uuid::new_v4(),
            true,
            vec![Box::new(a_slot), Box::new(TypedInputSlot::<B>::new("b"))],
            Box::new(Echo),
        );

        assert!(agent.try_aggregate().unwrap().is_none());
    }

    #[test]
    fn aggregate_join_fires_when_both_ports_have_matching_empty_provenance() {
        let a_slot = TypedInputSlot::<A>::new("a");
        a_slot
            .handle()
            .lock()
            .unwrap()
            .receive(Envelope::new(ProvenanceChain::new(), None, A(1)), None)
            .unwrap();
        let b_slot = TypedInputSlot::<B>::new("b");
        b_slot
            .handle()
            .lock()
            .unwrap()
            .receive(Envelope::new(ProvenanceChain::new(), None, B(2)), None)
            .unwrap();

        let mut agent = MultiInputAgent::new(Uuid::new_v4(), true, vec![Box::new(a_slot), Box::new(b_slot)], Box::new(Echo));
        let (joined, parents, _, _, _) = agent.try_aggregate().unwrap().unwrap();
        assert_eq!(joined.len(), 2);
        assert!(parents.is_empty());
    }

    #[test]
    fn step_routes_aggregate_output_and_rolls_back_on_error() {
        let a_slot = TypedInputSlot::<A>::new("a");
        a_slot
            .handle()
            .lock()
            .unwrap()
            .receive(Envelope::new(ProvenanceChain::new(), None, A(1)), None)
            .unwrap();
        let b_slot = TypedInputSlot::<B>::new("b");
        b_slot
            .handle()
            .lock()
            .unwrap()
            .receive(Envelope::new(ProvenanceChain::new(), None, B(2)), None)
            .unwrap();

        let mut agent = MultiInputAgent::new(Uuid::new_v4(), true, vec![Box::new(a_slot), Box::new(b_slot)], Box::new(Failing));
        assert!(agent.step().is_err());
        // Rolled back: both ports have their original message back.
        assert_eq!(agent.ports()[0].len(), 1);
        assert_eq!(agent.ports()[1].len(), 1);
    }
}
