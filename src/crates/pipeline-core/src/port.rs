//! Typed message ports (SPEC_FULL §4.1).
//!
//! An [`InputPort<T>`] is an unbounded FIFO queue. An [`OutputPort<T>`]
//! holds a list of [`Connection`]s plus an `unconnected_outputs` harvest
//! buffer for pipelines that never wire that output anywhere.
//!
//! A [`Connection`]'s target is a [`SharedInputPort`] — an `Arc<Mutex<..>>`
//! around the *same* queue the downstream `AgentRuntime` steps from, not a
//! private copy. This is what makes `send` on one agent's output port
//! actually deliver into another agent's real input queue (§4.2 `step`).

use crate::collector::{CollectorError, ListCollectorPort, ListModel};
use crate::error::{PipelineError, Result};
use crate::provenance::{ProvenanceChain, ProvenanceSegment};
use pipeline_checkpoint::Payload;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A queued or harvested message together with its provenance and
/// optional correlation id.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub parents: ProvenanceChain,
    pub timestamp_ms: i64,
    pub correlation_id: Option<String>,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(parents: ProvenanceChain, correlation_id: Option<String>, payload: T) -> Self {
        Self {
            parents,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            correlation_id,
            payload,
        }
    }

    pub fn map_payload<U>(self, payload: U) -> Envelope<U> {
        Envelope {
            parents: self.parents,
            timestamp_ms: self.timestamp_ms,
            correlation_id: self.correlation_id,
            payload,
        }
    }
}

pub type PreTransform<T> = Arc<dyn Fn(&T) -> Result<Vec<T>> + Send + Sync>;
pub type PostTransform<T> = Arc<dyn Fn(T) -> Result<T> + Send + Sync>;
pub type Condition<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// An IN port: an unbounded FIFO queue of [`Envelope<T>`].
#[derive(Debug)]
pub struct InputPort<T> {
    queue: VecDeque<Envelope<T>>,
}

impl<T> Clone for InputPort<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T> Default for InputPort<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl<T> InputPort<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh queue in the shared handle a [`Connection`] and the
    /// owning `AgentRuntime` both hold (§4.1, §6 "Wiring API").
    pub fn new_shared() -> SharedInputPort<T> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// `receive` — applies `post_transform` if present and appends to the
    /// queue (§4.1).
    pub fn receive(&mut self, envelope: Envelope<T>, post_transform: Option<&PostTransform<T>>) -> Result<()>
    where
        T: Clone,
    {
        let envelope = match post_transform {
            Some(f) => envelope.map_payload(f(envelope.payload.clone())?),
            None => envelope,
        };
        self.queue.push_back(envelope);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Envelope<T>> {
        self.queue.pop_front()
    }

    /// Re-inserts `envelope` at the front — used by error rollback (§4.2,
    /// property 9) and multi-input aggregate rollback (§4.3).
    pub fn push_front(&mut self, envelope: Envelope<T>) {
        self.queue.push_front(envelope);
    }

    /// Returns a reference to the envelope at `index` without removing
    /// it. Used by the alignment search (§4.3), which must inspect queue
    /// contents without consuming them until a full alignment is found.
    pub fn peek(&self, index: usize) -> Option<&Envelope<T>> {
        self.queue.get(index)
    }

    /// Removes and returns the envelope at `index`, preserving the
    /// relative order of the rest of the queue.
    pub fn remove(&mut self, index: usize) -> Option<Envelope<T>> {
        self.queue.remove(index)
    }

    /// Re-inserts `envelope` at `index`, used by aggregate-mode error
    /// rollback which must restore each port's original index (§4.3).
    pub fn insert(&mut self, index: usize, envelope: Envelope<T>) {
        let index = index.min(self.queue.len());
        self.queue.insert(index, envelope);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope<T>> {
        self.queue.iter()
    }
}

/// A shared handle onto an [`InputPort<T>`]'s queue, referenced by both
/// the owning `AgentRuntime`/`MultiInputAgent` slot and every upstream
/// [`Connection`] wired to it (§6 "Wiring API": `connect_to` joins an
/// output port to this exact handle, not a private copy).
pub type SharedInputPort<T> = Arc<Mutex<InputPort<T>>>;

/// What a [`Connection`] delivers into: either a plain downstream queue,
/// or a collector that only forwards into its `downstream` queue once a
/// full fan-out batch has arrived (§4.4: the list collector is "a
/// specialised input port of an agent", wired in front of that agent's
/// real queue rather than replacing it).
pub enum ConnectionTarget<T> {
    Queue(SharedInputPort<T>),
    Collector {
        collector: Arc<Mutex<ListCollectorPort<T>>>,
        downstream: SharedInputPort<ListModel<T>>,
    },
}

impl<T> Clone for ConnectionTarget<T> {
    fn clone(&self) -> Self {
        match self {
            ConnectionTarget::Queue(q) => ConnectionTarget::Queue(Arc::clone(q)),
            ConnectionTarget::Collector { collector, downstream } => ConnectionTarget::Collector {
                collector: Arc::clone(collector),
                downstream: Arc::clone(downstream),
            },
        }
    }
}

impl<T: Payload + Clone> ConnectionTarget<T> {
    fn receive(&self, envelope: Envelope<T>, post_transform: Option<&PostTransform<T>>) -> Result<()> {
        match self {
            ConnectionTarget::Queue(queue) => queue
                .lock()
                .expect("input port mutex poisoned")
                .receive(envelope, post_transform),
            ConnectionTarget::Collector { collector, downstream } => {
                let envelope = match post_transform {
                    Some(f) => envelope.map_payload(f(envelope.payload.clone())?),
                    None => envelope,
                };
                let completed = collector
                    .lock()
                    .expect("collector mutex poisoned")
                    .receive(envelope)
                    .map_err(|e: CollectorError| PipelineError::Validation(e.to_string()))?;
                if let Some(batch) = completed {
                    downstream
                        .lock()
                        .expect("input port mutex poisoned")
                        .receive(batch, None)?;
                }
                Ok(())
            }
        }
    }

    /// Snapshot view of whatever is directly queued (not partial
    /// collector buffers, which the owning agent's snapshot captures
    /// separately — see `collector.rs`).
    fn queued_envelopes(&self) -> Vec<Envelope<T>>
    where
        T: Clone,
    {
        match self {
            ConnectionTarget::Queue(queue) => queue
                .lock()
                .expect("input port mutex poisoned")
                .iter()
                .cloned()
                .collect(),
            ConnectionTarget::Collector { .. } => Vec::new(),
        }
    }
}

/// A wired edge from an [`OutputPort<T>`] to a downstream [`SharedInputPort`]
/// or [`ListCollectorPort`] (§4.1, §4.4).
///
/// Closures are `Arc<dyn Fn>` trait objects, the same closure-as-value
/// idiom the teacher uses for reducer and node-executor functions.
pub struct Connection<T> {
    pub target: ConnectionTarget<T>,
    pub src_agent: Uuid,
    pub tgt_agent: Uuid,
    pub pre_transform: Option<PreTransform<T>>,
    pub post_transform: Option<PostTransform<T>>,
    pub condition: Option<Condition<T>>,
}

impl<T> Connection<T> {
    /// Envelopes currently sitting in this connection's downstream queue.
    /// Empty for collector-backed connections, whose pending state lives
    /// in the collector's own partial buffers instead.
    pub fn queued_envelopes(&self) -> Vec<Envelope<T>>
    where
        T: Payload + Clone,
    {
        self.target.queued_envelopes()
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("src_agent", &self.src_agent)
            .field("tgt_agent", &self.tgt_agent)
            .field("has_pre_transform", &self.pre_transform.is_some())
            .field("has_post_transform", &self.post_transform.is_some())
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}

impl<T> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            src_agent: self.src_agent,
            tgt_agent: self.tgt_agent,
            pre_transform: self.pre_transform.clone(),
            post_transform: self.post_transform.clone(),
            condition: self.condition.clone(),
        }
    }
}

/// An OUT port: a list of wired [`Connection`]s plus the
/// `unconnected_outputs` fallback buffer (§4.1).
pub struct OutputPort<T> {
    name: String,
    connections: Vec<Connection<T>>,
    unconnected_outputs: Vec<Envelope<T>>,
}

impl<T> fmt::Debug for OutputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("name", &self.name)
            .field("connections", &self.connections.len())
            .field("unconnected_outputs", &self.unconnected_outputs.len())
            .finish()
    }
}

impl<T: Payload + Clone> OutputPort<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connections: Vec::new(),
            unconnected_outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connections(&self) -> &[Connection<T>] {
        &self.connections
    }

    pub fn unconnected_outputs(&self) -> &[Envelope<T>] {
        &self.unconnected_outputs
    }

    pub fn drain_unconnected_outputs(&mut self) -> Vec<Envelope<T>> {
        std::mem::take(&mut self.unconnected_outputs)
    }

    pub fn clear_unconnected_outputs(&mut self) {
        self.unconnected_outputs.clear();
    }

    /// Removes and returns the oldest harvested-but-unconnected output,
    /// used by `Scheduler::pop_one_output_for_agent` (§4.5 "Output
    /// harvesting").
    pub fn pop_unconnected_output(&mut self) -> Option<Envelope<T>> {
        if self.unconnected_outputs.is_empty() {
            None
        } else {
            Some(self.unconnected_outputs.remove(0))
        }
    }

    /// `connect` — wires this output directly into a downstream agent's
    /// real input queue (§6 "Wiring API" `connect_to`). `target` is the
    /// *same* shared handle the downstream `AgentRuntime`/`MultiInputAgent`
    /// steps from, so a `send` here is visible to that agent's next
    /// `step()`.
    pub fn connect(
        &mut self,
        target: SharedInputPort<T>,
        src_agent: Uuid,
        tgt_agent: Uuid,
        pre_transform: Option<PreTransform<T>>,
        post_transform: Option<PostTransform<T>>,
        condition: Option<Condition<T>>,
    ) {
        self.connections.push(Connection {
            target: ConnectionTarget::Queue(target),
            src_agent,
            tgt_agent,
            pre_transform,
            post_transform,
            condition,
        });
    }

    /// `connect_via_collector` — wires this output into a fresh
    /// [`ListCollectorPort<T>`] that only forwards a completed
    /// [`ListModel<T>`] batch into `downstream` once every fan-out sibling
    /// has arrived (§4.4 "a specialised input port of an agent").
    pub fn connect_via_collector(
        &mut self,
        collector: Arc<Mutex<ListCollectorPort<T>>>,
        downstream: SharedInputPort<ListModel<T>>,
        src_agent: Uuid,
        tgt_agent: Uuid,
        pre_transform: Option<PreTransform<T>>,
        condition: Option<Condition<T>>,
    ) {
        self.connections.push(Connection {
            target: ConnectionTarget::Collector { collector, downstream },
            src_agent,
            tgt_agent,
            pre_transform,
            post_transform: None,
            condition,
        });
    }

    /// Every agent uuid any connection of this port targets (§4.5
    /// "Entry-agent detection", `validate_pipeline`).
    pub fn connected_target_agents(&self) -> Vec<Uuid> {
        self.connections.iter().map(|c| c.tgt_agent).collect()
    }

    /// `send` — fans a payload (or list of payloads) out across every
    /// wired edge, tagging each surviving copy with a fresh provenance
    /// segment (§4.1 steps 1-4).
    ///
    /// A transform failure on edge `k` stops the emission loop for that
    /// edge only and propagates; edges already served before it keep
    /// their deliveries (no rollback across edges).
    pub fn send(
        &mut self,
        items: Vec<T>,
        parents: &ProvenanceChain,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        if self.connections.is_empty() {
            for item in items {
                self.unconnected_outputs.push(Envelope::new(
                    parents.clone(),
                    correlation_id.map(str::to_string),
                    item,
                ));
            }
            return Ok(());
        }

        for conn_idx in 0..self.connections.len() {
            let (target_items, condition) = {
                let conn = &self.connections[conn_idx];
                let pre_applied: Vec<T> = match &conn.pre_transform {
                    Some(f) => {
                        let mut out = Vec::new();
                        for item in &items {
                            out.extend(f(item).map_err(|e| PipelineError::Transform {
                                port: self.name.clone(),
                                source: Box::new(e),
                            })?);
                        }
                        out
                    }
                    None => items.clone(),
                };
                (pre_applied, conn.condition.clone())
            };

            let surviving: Vec<T> = match &condition {
                Some(cond) => target_items.into_iter().filter(|item| cond(item)).collect(),
                None => target_items,
            };

            let fanout = surviving.len() as u32;
            if fanout == 0 {
                continue;
            }

            let emission_uuid = Uuid::new_v4().as_u128();
            for (j, item) in surviving.into_iter().enumerate() {
                let segment = ProvenanceSegment::new(emission_uuid, j as u32, fanout);
                let new_parents = parents.with_appended(segment);
                let conn = &self.connections[conn_idx];
                let envelope = Envelope::new(new_parents, correlation_id.map(str::to_string), item);
                let post_transform = conn.post_transform.clone();
                self.connections[conn_idx]
                    .target
                    .receive(envelope, post_transform.as_ref())
                    .map_err(|e| PipelineError::Transform {
                        port: self.name.clone(),
                        source: Box::new(e),
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ProvenanceChain {
        ProvenanceChain::new()
    }

    #[test]
    fn send_with_no_connections_fills_unconnected_outputs() {
        let mut port: OutputPort<i32> = OutputPort::new("out");
        port.send(vec![1, 2, 3], &chain(), None).unwrap();
        assert_eq!(port.unconnected_outputs().len(), 3);
    }

    #[test]
    fn send_fans_out_with_distinct_indices() {
        let mut port: OutputPort<i32> = OutputPort::new("out");
        let target = InputPort::new_shared();
        port.connect(Arc::clone(&target), Uuid::new_v4(), Uuid::new_v4(), None, None, None);
        port.send(vec![10, 20, 30], &chain(), None).unwrap();

        let segments: Vec<_> = target
            .lock()
            .unwrap()
            .iter()
            .map(|env| env.parents.0.last().unwrap().suffix())
            .collect();
        assert_eq!(segments, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn condition_filters_and_reindexes_contiguously() {
        let mut port: OutputPort<i32> = OutputPort::new("out");
        let target = InputPort::new_shared();
        let condition: Condition<i32> = Arc::new(|v| v % 2 == 0);
        port.connect(Arc::clone(&target), Uuid::new_v4(), Uuid::new_v4(), None, None, Some(condition));
        port.send(vec![1, 2, 3, 4, 5], &chain(), None).unwrap();

        assert_eq!(target.lock().unwrap().len(), 2);
        let segments: Vec<_> = target
            .lock()
            .unwrap()
            .iter()
            .map(|env| env.parents.0.last().unwrap().suffix())
            .collect();
        assert_eq!(segments, vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn dropped_single_element_produces_zero_envelopes() {
        let mut port: OutputPort<i32> = OutputPort::new("out");
        let target = InputPort::new_shared();
        let condition: Condition<i32> = Arc::new(|_| false);
        port.connect(Arc::clone(&target), Uuid::new_v4(), Uuid::new_v4(), None, None, Some(condition));
        port.send(vec![1], &chain(), None).unwrap();

        assert_eq!(target.lock().unwrap().len(), 0);
        assert!(port.unconnected_outputs().is_empty());
    }

    #[test]
    fn connect_wires_a_shared_handle_not_a_private_copy() {
        let mut port: OutputPort<i32> = OutputPort::new("out");
        let target = InputPort::new_shared();
        port.connect(Arc::clone(&target), Uuid::new_v4(), Uuid::new_v4(), None, None, None);
        port.send(vec![7], &chain(), None).unwrap();

        // The handle retained by the test observes the same delivery the
        // connection wrote through, proving shared (not owned) state.
        assert_eq!(target.lock().unwrap().pop_front().unwrap().payload, 7);
    }
}
