//! Agent core: the abstract unit with one input port, one-or-more typed
//! output ports, private state, and `run` (SPEC_FULL §4.2).
//!
//! `Agent` is a generic trait over a concrete input payload type. Because
//! the scheduler needs to hold heterogeneous agents in one `Vec`, the
//! generic logic is wrapped by [`AgentRuntime`], which erases `Agent`'s
//! associated type behind the object-safe [`crate::schedulable::Schedulable`]
//! trait — the same "generic logic + type-erased runtime shell" split the
//! teacher uses for `NodeExecutor` closures boxed into `Pin<Box<dyn
//! Future<...>>>` trait objects inside a homogeneous node registry.

use crate::collector::{ListCollectorPort, ListModel};
use crate::error::{PipelineError, Result};
use crate::multi_input::MultiInputAgent;
use crate::port::{Condition, Envelope, InputPort, OutputPort, PostTransform, PreTransform, SharedInputPort};
use crate::provenance::ProvenanceChain;
use crate::schedulable::Schedulable;
use pipeline_checkpoint::{AgentSnapshot, Payload, PortSnapshot};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Sentinel output schema meaning "no message is emitted" (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct NullPayload;

/// Sentinel input schema meaning "this agent is a source; `step` should
/// be invoked every round regardless of queue state" (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct InfiniteInputMarker;

/// Overrides the inherited correlation id for one returned element
/// (§4.2). The only sanctioned way for `run` to change the correlation id
/// downstream.
#[derive(Debug, Clone)]
pub struct IdWrapper<T> {
    pub id: String,
    pub message: T,
}

impl<T> IdWrapper<T> {
    pub fn new(id: impl Into<String>, message: T) -> Self {
        Self {
            id: id.into(),
            message,
        }
    }
}

/// A single routed output value: its concrete payload plus an optional
/// per-element correlation id override, boxed behind `TypeId` so the
/// output routing table (`HashMap<TypeId, Box<dyn ErasedOutputPort>>`)
/// does not need to be generic over every payload type an agent might
/// produce (§3 [ADDED], §9 "registry keyed by a type identifier").
pub struct BoxedPayload {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send>,
    correlation_override: Option<String>,
}

impl fmt::Debug for BoxedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedPayload")
            .field("type_name", &self.type_name)
            .field("correlation_override", &self.correlation_override)
            .finish()
    }
}

impl BoxedPayload {
    pub fn new<T: Payload>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
            correlation_override: None,
        }
    }

    pub fn with_correlation_override(mut self, id: impl Into<String>) -> Self {
        self.correlation_override = Some(id.into());
        self
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn correlation_override(&self) -> Option<&str> {
        self.correlation_override.as_deref()
    }

    pub fn downcast<T: Payload>(self) -> std::result::Result<T, Self> {
        if self.type_id != TypeId::of::<T>() {
            return Err(self);
        }
        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(value) => Err(Self {
                type_id: self.type_id,
                type_name: self.type_name,
                value,
                correlation_override: self.correlation_override,
            }),
        }
    }
}

/// The Rust stand-in for "payload | list | tuple | `IdWrapper` | null"
/// (§4.2 [ADDED]).
#[derive(Debug, Default)]
pub enum RunOutput {
    #[default]
    None,
    One(BoxedPayload),
    Many(Vec<BoxedPayload>),
    Tuple(Vec<BoxedPayload>),
}

impl RunOutput {
    /// Flattens into the list of `(BoxedPayload, is_from_list)` pairs the
    /// routing step (§4.2 return-value routing) dispatches one at a time.
    /// `Many` fans out as one list-send per routed type; `Tuple` routes
    /// each element independently to its own port.
    pub fn into_routed(self) -> Vec<RoutedGroup> {
        match self {
            RunOutput::None => Vec::new(),
            RunOutput::One(p) => vec![RoutedGroup::Single(p)],
            RunOutput::Tuple(items) => items.into_iter().map(RoutedGroup::Single).collect(),
            RunOutput::Many(items) => {
                let mut by_type: Vec<(TypeId, Vec<BoxedPayload>)> = Vec::new();
                for item in items {
                    if let Some((_, bucket)) = by_type.iter_mut().find(|(t, _)| *t == item.type_id()) {
                        bucket.push(item);
                    } else {
                        by_type.push((item.type_id(), vec![item]));
                    }
                }
                by_type
                    .into_iter()
                    .map(|(_, items)| RoutedGroup::List(items))
                    .collect()
            }
        }
    }
}

/// One group of same-typed payloads headed to a single output port: a
/// singleton (tuple element or `One`) or a list (a `Many` bucket, which
/// the output port fans out per §4.1).
pub enum RoutedGroup {
    Single(BoxedPayload),
    List(Vec<BoxedPayload>),
}

impl RoutedGroup {
    pub fn type_id(&self) -> TypeId {
        match self {
            RoutedGroup::Single(p) => p.type_id(),
            RoutedGroup::List(items) => items
                .first()
                .map(|p| p.type_id())
                .expect("RoutedGroup::List is never constructed empty"),
        }
    }
}

/// Blanket conversion so `run` bodies can return a concrete `Payload`
/// type, a `Vec<T>`, a tuple, or an `IdWrapper<T>` directly, matching
/// §4.2's "the public `run` signature still accepts `IdWrapper<T>` ...
/// via a blanket `Into<RunOutput>`".
pub trait IntoRunOutput {
    fn into_run_output(self) -> RunOutput;
}

impl IntoRunOutput for RunOutput {
    fn into_run_output(self) -> RunOutput {
        self
    }
}

impl<T: Payload> IntoRunOutput for T {
    fn into_run_output(self) -> RunOutput {
        RunOutput::One(BoxedPayload::new(self))
    }
}

impl<T: Payload> IntoRunOutput for IdWrapper<T> {
    fn into_run_output(self) -> RunOutput {
        RunOutput::One(BoxedPayload::new(self.message).with_correlation_override(self.id))
    }
}

impl<T: Payload> IntoRunOutput for Vec<T> {
    fn into_run_output(self) -> RunOutput {
        RunOutput::Many(self.into_iter().map(BoxedPayload::new).collect())
    }
}

impl IntoRunOutput for Option<RunOutput> {
    fn into_run_output(self) -> RunOutput {
        self.unwrap_or(RunOutput::None)
    }
}

/// An output port with its payload type erased behind `TypeId`, so a
/// single agent's output routing table can hold ports for several
/// unrelated payload types (§3 [ADDED]).
pub trait ErasedOutputPort: Send {
    fn type_id(&self) -> TypeId;
    fn name(&self) -> &str;
    fn accept_one(&mut self, payload: BoxedPayload, parents: &ProvenanceChain) -> Result<()>;
    fn accept_many(&mut self, payloads: Vec<BoxedPayload>, parents: &ProvenanceChain) -> Result<()>;
    fn unconnected_outputs_json(&self) -> Vec<serde_json::Value>;
    fn drain_unconnected_outputs_json(&mut self) -> Vec<serde_json::Value>;
    fn pop_one_unconnected_output_json(&mut self) -> Option<serde_json::Value>;
    fn clear_unconnected_outputs_json(&mut self);
    /// Every agent uuid any connection of this port targets (§4.5
    /// "Entry-agent detection", `validate_pipeline`).
    fn connected_target_agents(&self) -> Vec<Uuid>;
    fn snapshot(&self) -> Result<PortSnapshot>;
    /// Downcasting hook for `connect_to`/`connect_collector_to`, which
    /// need the concrete `OutputPort<T>` behind the `TypeId` lookup.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Concrete [`ErasedOutputPort`] wrapping a typed [`OutputPort<T>`].
pub struct TypedOutputPort<T: Payload + Clone> {
    name: String,
    port: OutputPort<T>,
}

impl<T: Payload + Clone> TypedOutputPort<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            port: OutputPort::new(name.clone()),
            name,
        }
    }

    pub fn port_mut(&mut self) -> &mut OutputPort<T> {
        &mut self.port
    }

    pub fn port(&self) -> &OutputPort<T> {
        &self.port
    }
}

fn downcast_correlated<T: Payload>(payload: BoxedPayload) -> (T, Option<String>) {
    let correlation = payload.correlation_override().map(str::to_string);
    let value = payload
        .downcast::<T>()
        .unwrap_or_else(|_| panic!("routing table type mismatch: expected {}", std::any::type_name::<T>()));
    (value, correlation)
}

impl<T: Payload + Clone> ErasedOutputPort for TypedOutputPort<T> {
    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn accept_one(&mut self, payload: BoxedPayload, parents: &ProvenanceChain) -> Result<()> {
        let (value, correlation) = downcast_correlated::<T>(payload);
        self.port.send(vec![value], parents, correlation.as_deref())
    }

    fn accept_many(&mut self, payloads: Vec<BoxedPayload>, parents: &ProvenanceChain) -> Result<()> {
        let mut correlation = None;
        let mut values = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let (value, corr) = downcast_correlated::<T>(payload);
            correlation = correlation.or(corr);
            values.push(value);
        }
        self.port.send(values, parents, correlation.as_deref())
    }

    fn unconnected_outputs_json(&self) -> Vec<serde_json::Value> {
        self.port
            .unconnected_outputs()
            .iter()
            .filter_map(|env| serde_json::to_value(&env.payload).ok())
            .collect()
    }

    fn drain_unconnected_outputs_json(&mut self) -> Vec<serde_json::Value> {
        self.port
            .drain_unconnected_outputs()
            .iter()
            .filter_map(|env| serde_json::to_value(&env.payload).ok())
            .collect()
    }

    fn pop_one_unconnected_output_json(&mut self) -> Option<serde_json::Value> {
        self.port
            .pop_unconnected_output()
            .and_then(|env| serde_json::to_value(&env.payload).ok())
    }

    fn clear_unconnected_outputs_json(&mut self) {
        self.port.clear_unconnected_outputs();
    }

    fn connected_target_agents(&self) -> Vec<Uuid> {
        self.port.connected_target_agents()
    }

    fn snapshot(&self) -> Result<PortSnapshot> {
        let queue = self
            .port
            .connections()
            .iter()
            .flat_map(|c| c.queued_envelopes())
            .map(|env| envelope_to_snapshot(&env))
            .collect::<Result<Vec<_>>>()?;
        let unconnected_outputs = self
            .port
            .unconnected_outputs()
            .iter()
            .map(envelope_to_snapshot)
            .collect::<Result<Vec<_>>>()?;
        Ok(PortSnapshot {
            queue,
            unconnected_outputs,
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn envelope_to_snapshot<T: Serialize>(
    envelope: &Envelope<T>,
) -> Result<pipeline_checkpoint::EnvelopeSnapshot> {
    Ok(pipeline_checkpoint::EnvelopeSnapshot {
        parents: envelope.parents.to_strings(),
        timestamp_ms: envelope.timestamp_ms,
        correlation_id: envelope.correlation_id.clone(),
        payload: serde_json::to_value(&envelope.payload)?,
    })
}

/// Routes a `run`/`process` return value to the matching output port by
/// `TypeId`, falling back to the single declared port when there is
/// exactly one (§4.2 return-value routing). Shared between
/// [`AgentRuntime::route`] and [`crate::multi_input::MultiInputAgent`],
/// which both own a `HashMap<TypeId, Box<dyn ErasedOutputPort>>` output
/// table.
pub(crate) fn route_to_ports(
    output_ports: &mut HashMap<TypeId, Box<dyn ErasedOutputPort>>,
    single_output_fallback: Option<TypeId>,
    output: RunOutput,
    parents: &ProvenanceChain,
    self_uuid: Uuid,
) -> Result<()> {
    for group in output.into_routed() {
        let type_id = group.type_id();
        let port_key = output_ports
            .contains_key(&type_id)
            .then_some(type_id)
            .or(single_output_fallback)
            .ok_or_else(|| PipelineError::port_resolution(self_uuid.to_string()))?;
        let port = output_ports.get_mut(&port_key).expect("port_key was just resolved");
        match group {
            RoutedGroup::Single(payload) => port.accept_one(payload, parents)?,
            RoutedGroup::List(payloads) => port.accept_many(payloads, parents)?,
        }
    }
    Ok(())
}

/// Domain contract implemented by every agent (§4.2, §6).
///
/// `run` is the only method domain code must implement; `process` has a
/// default that just calls `run`, matching §4.2's "may also override
/// `process` for rare cases needing provenance access".
pub trait Agent: Send {
    type Input: Payload;

    fn uuid(&self) -> Uuid;

    fn run(&mut self, input: Self::Input, correlation_id: Option<&str>) -> Result<RunOutput>;

    /// Default `process` delegates straight to `run`, ignoring
    /// `parents`. Override when an agent needs provenance access.
    fn process(
        &mut self,
        input: Self::Input,
        _parents: &ProvenanceChain,
        correlation_id: Option<&str>,
    ) -> Result<RunOutput> {
        self.run(input, correlation_id)
    }

    /// Private state, opaque to the runtime except for snapshotting.
    fn state_snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn restore_state(&mut self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// Owns one agent's ports and drives its cooperative `step()`, wrapping a
/// generic [`Agent`] impl (§4.2).
pub struct AgentRuntime<A: Agent> {
    uuid: Uuid,
    logic: A,
    is_active: bool,
    input_port: SharedInputPort<A::Input>,
    output_ports: HashMap<TypeId, Box<dyn ErasedOutputPort>>,
    single_output_fallback: Option<TypeId>,
}

impl<A: Agent> AgentRuntime<A> {
    pub fn new(logic: A) -> Self {
        let uuid = logic.uuid();
        Self {
            uuid,
            logic,
            is_active: true,
            input_port: InputPort::new_shared(),
            output_ports: HashMap::new(),
            single_output_fallback: None,
        }
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

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    /// A shared handle onto this agent's real input queue — the thing an
    /// upstream `OutputPort::connect` must be wired to so a `send`
    /// actually lands here rather than in a private, never-stepped copy
    /// (§6 "Wiring API").
    pub fn input_handle(&self) -> SharedInputPort<A::Input> {
        Arc::clone(&self.input_port)
    }

    pub fn input_port_mut(&self) -> std::sync::MutexGuard<'_, InputPort<A::Input>> {
        self.input_port.lock().expect("input port mutex poisoned")
    }

    pub fn logic(&self) -> &A {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut A {
        &mut self.logic
    }

    /// External injection into the input port — the pipeline entry point
    /// (§4.2 `feed`).
    pub fn feed(&mut self, payload: A::Input, correlation_id: Option<String>) -> Result<()>
    where
        A::Input: Clone,
    {
        let envelope = Envelope::new(ProvenanceChain::new(), correlation_id, payload);
        self.input_port
            .lock()
            .expect("input port mutex poisoned")
            .receive(envelope, None)
    }

    fn output_port_mut<T: Payload + Clone>(&mut self) -> Option<&mut OutputPort<T>> {
        let type_id = TypeId::of::<T>();
        self.output_ports
            .get_mut(&type_id)?
            .as_any_mut()
            .downcast_mut::<TypedOutputPort<T>>()
            .map(|p| p.port_mut())
    }

    /// Wires this agent's `T`-typed output port to `target`'s actual input
    /// queue (§6 "Wiring API" `connect_to`), so a send here is visible to
    /// `target`'s own `step()` — not a connection-private clone.
    pub fn connect_to<T, U>(
        &mut self,
        target: &AgentRuntime<U>,
        pre_transform: Option<PreTransform<T>>,
        post_transform: Option<PostTransform<T>>,
        condition: Option<Condition<T>>,
    ) -> Result<()>
    where
        T: Payload + Clone,
        U: Agent<Input = T>,
    {
        let tgt_handle = target.input_handle();
        let tgt_uuid = target.uuid();
        let src_uuid = self.uuid;
        let port = self
            .output_port_mut::<T>()
            .ok_or_else(|| PipelineError::port_resolution(self.uuid.to_string()))?;
        port.connect(tgt_handle, src_uuid, tgt_uuid, pre_transform, post_transform, condition);
        Ok(())
    }

    /// Wires this agent's `T`-typed output to one of `target`'s named
    /// input slots (§6 "Wiring API", §4.3).
    pub fn connect_to_slot<T>(
        &mut self,
        target: &MultiInputAgent,
        slot_name: &str,
        pre_transform: Option<PreTransform<T>>,
        post_transform: Option<PostTransform<T>>,
        condition: Option<Condition<T>>,
    ) -> Result<()>
    where
        T: Payload + Clone,
    {
        let tgt_handle = target.port_handle::<T>(slot_name).ok_or_else(|| {
            PipelineError::Validation(format!("no input slot named '{slot_name}' on target agent"))
        })?;
        let tgt_uuid = target.uuid();
        let src_uuid = self.uuid;
        let port = self
            .output_port_mut::<T>()
            .ok_or_else(|| PipelineError::port_resolution(self.uuid.to_string()))?;
        port.connect(tgt_handle, src_uuid, tgt_uuid, pre_transform, post_transform, condition);
        Ok(())
    }

    /// Wires this agent's `T`-typed output to a fresh [`ListCollectorPort<T>`]
    /// that only forwards into `target`'s real input queue once a
    /// complete fan-out batch has arrived (§4.4 "a specialised input port
    /// of an agent"), making a `Mapper → ListCollector → Reducer`
    /// pipeline work end to end.
    pub fn connect_collector_to<T, U>(
        &mut self,
        target: &AgentRuntime<U>,
        pre_transform: Option<PreTransform<T>>,
        condition: Option<Condition<T>>,
    ) -> Result<Arc<Mutex<ListCollectorPort<T>>>>
    where
        T: Payload + Clone,
        U: Agent<Input = ListModel<T>>,
    {
        let collector = Arc::new(Mutex::new(ListCollectorPort::<T>::new()));
        let downstream = target.input_handle();
        let tgt_uuid = target.uuid();
        let src_uuid = self.uuid;
        let port = self
            .output_port_mut::<T>()
            .ok_or_else(|| PipelineError::port_resolution(self.uuid.to_string()))?;
        port.connect_via_collector(
            Arc::clone(&collector),
            downstream,
            src_uuid,
            tgt_uuid,
            pre_transform,
            condition,
        );
        Ok(collector)
    }

    fn route(&mut self, output: RunOutput, parents: &ProvenanceChain) -> Result<()> {
        route_to_ports(&mut self.output_ports, self.single_output_fallback, output, parents, self.uuid)
    }

    /// True if this agent's declared input schema is the infinite-source
    /// sentinel (§4.5 "Entry-agent detection").
    fn is_infinite_source() -> bool {
        TypeId::of::<A::Input>() == TypeId::of::<InfiniteInputMarker>()
    }

    /// One cooperative turn (§4.2 `step`). Returns `true` if work was
    /// done, `false` if the queue was empty (and this agent is not an
    /// infinite source).
    pub fn step(&mut self) -> Result<bool>
    where
        A::Input: Clone,
    {
        if !self.is_active {
            return Ok(false);
        }

        let is_infinite_source = Self::is_infinite_source();
        let envelope = if is_infinite_source {
            // §4.2 step 1: synthesise an empty input each round without
            // dequeuing. The TypeId equality just checked guarantees this
            // downcast succeeds.
            let marker: Box<dyn Any> = Box::new(InfiniteInputMarker);
            let payload = *marker
                .downcast::<A::Input>()
                .expect("TypeId equality above guarantees this downcast succeeds");
            Envelope::new(ProvenanceChain::new(), None, payload)
        } else {
            match self.input_port.lock().expect("input port mutex poisoned").pop_front() {
                Some(env) => env,
                None => return Ok(false),
            }
        };

        let parents = envelope.parents.clone();
        let correlation_id = envelope.correlation_id.clone();
        let payload = envelope.payload.clone();

        match self
            .logic
            .process(payload, &parents, correlation_id.as_deref())
        {
            Ok(output) => {
                self.route(output, &parents)?;
                Ok(true)
            }
            Err(e) => {
                // Error rollback (§4.2 step 3, property 9): the envelope
                // goes back to the head of the queue. A synthesised
                // infinite-source input was never dequeued, so there is
                // nothing to restore.
                if !is_infinite_source {
                    self.input_port
                        .lock()
                        .expect("input port mutex poisoned")
                        .push_front(envelope);
                }
                Err(e)
            }
        }
    }

    pub fn snapshot(&self) -> Result<AgentSnapshot> {
        let mut ports = HashMap::new();
        let queue = self
            .input_port
            .lock()
            .expect("input port mutex poisoned")
            .iter()
            .map(envelope_to_snapshot)
            .collect::<Result<Vec<_>>>()?;
        ports.insert(
            "input_port".to_string(),
            PortSnapshot {
                queue,
                unconnected_outputs: Vec::new(),
            },
        );
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

    pub fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()>
    where
        A::Input: for<'de> Deserialize<'de>,
    {
        self.is_active = snapshot.is_active;
        self.logic.restore_state(snapshot.state.clone())?;
        if let Some(port_snapshot) = snapshot.ports.get("input_port") {
            let mut input_port = self.input_port.lock().expect("input port mutex poisoned");
            *input_port = InputPort::new();
            for env in &port_snapshot.queue {
                let parents = ProvenanceChain::from_strings(&env.parents)
                    .map_err(|e| PipelineError::Validation(e.to_string()))?;
                let payload: A::Input = serde_json::from_value(env.payload.clone())?;
                input_port.receive(
                    Envelope {
                        parents,
                        timestamp_ms: env.timestamp_ms,
                        correlation_id: env.correlation_id.clone(),
                        payload,
                    },
                    None,
                )?;
            }
        }
        Ok(())
    }
}

impl<A> Schedulable for AgentRuntime<A>
where
    A: Agent,
    A::Input: Clone + for<'de> Deserialize<'de>,
{
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
        AgentRuntime::step(self)
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

    fn is_infinite_source(&self) -> bool {
        Self::is_infinite_source()
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

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Counted(i32);

    struct Doubler {
        id: Uuid,
    }

    impl Agent for Doubler {
        type Input = Counted;

        fn uuid(&self) -> Uuid {
            self.id
        }

        fn run(&mut self, input: Counted, _correlation_id: Option<&str>) -> Result<RunOutput> {
            Ok(Counted(input.0 * 2).into_run_output())
        }
    }

    #[test]
    fn step_routes_single_output_through_fallback_port() {
        let mut runtime = AgentRuntime::new(Doubler { id: Uuid::new_v4() });
        runtime.add_output_port(Box::new(TypedOutputPort::<Counted>::new("sink")));
        runtime.feed(Counted(21), None).unwrap();

        let did_work = runtime.step().unwrap();
        assert!(did_work);

        let port = runtime
            .output_ports
            .get(&TypeId::of::<Counted>())
            .unwrap();
        let outputs = port.unconnected_outputs_json();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0], serde_json::json!(42));
    }

    #[test]
    fn step_on_empty_queue_returns_false() {
        let mut runtime = AgentRuntime::new(Doubler { id: Uuid::new_v4() });
        runtime.add_output_port(Box::new(TypedOutputPort::<Counted>::new("sink")));
        assert!(!runtime.step().unwrap());
    }

    struct Failing {
        id: Uuid,
        fail_on: i32,
    }

    impl Agent for Failing {
        type Input = Counted;

        fn uuid(&self) -> Uuid {
            self.id
        }

        fn run(&mut self, input: Counted, _correlation_id: Option<&str>) -> Result<RunOutput> {
            if input.0 == self.fail_on {
                return Err(PipelineError::Validation("boom".to_string()));
            }
            Ok(input.into_run_output())
        }
    }

    #[test]
    fn failed_run_reinserts_envelope_at_queue_head() {
        let mut runtime = AgentRuntime::new(Failing {
            id: Uuid::new_v4(),
            fail_on: 2,
        });
        runtime.add_output_port(Box::new(TypedOutputPort::<Counted>::new("sink")));
        runtime.feed(Counted(2), None).unwrap();

        assert!(runtime.step().is_err());
        assert_eq!(runtime.input_port_mut().len(), 1);
        assert_eq!(runtime.input_port_mut().peek(0).unwrap().payload.0, 2);
    }

    struct SourceAgent {
        id: Uuid,
        emitted: i32,
    }

    impl Agent for SourceAgent {
        type Input = InfiniteInputMarker;

        fn uuid(&self) -> Uuid {
            self.id
        }

        fn run(&mut self, _input: InfiniteInputMarker, _correlation_id: Option<&str>) -> Result<RunOutput> {
            self.emitted += 1;
            Ok(Counted(self.emitted).into_run_output())
        }
    }

    #[test]
    fn infinite_source_steps_every_round_without_a_queued_message() {
        let mut runtime = AgentRuntime::new(SourceAgent { id: Uuid::new_v4(), emitted: 0 });
        runtime.add_output_port(Box::new(TypedOutputPort::<Counted>::new("out")));

        assert!(runtime.step().unwrap());
        assert!(runtime.step().unwrap());
        assert_eq!(runtime.logic().emitted, 2);
    }

    #[test]
    fn connect_to_delivers_into_the_downstream_agents_real_queue() {
        let mut upstream = AgentRuntime::new(Doubler { id: Uuid::new_v4() });
        upstream.add_output_port(Box::new(TypedOutputPort::<Counted>::new("out")));
        let downstream = AgentRuntime::new(Doubler { id: Uuid::new_v4() });

        upstream.connect_to(&downstream, None, None, None).unwrap();
        upstream.feed(Counted(5), None).unwrap();
        assert!(upstream.step().unwrap());

        assert_eq!(downstream.input_port_mut().len(), 1);
        assert_eq!(downstream.input_port_mut().peek(0).unwrap().payload.0, 10);
    }
}
