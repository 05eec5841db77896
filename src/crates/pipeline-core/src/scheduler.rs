//! Round-robin cooperative scheduler (SPEC_FULL §4.5).

use crate::debugger::{DebuggerHook, NoopDebugger};
use crate::error::{PipelineError, Result};
use crate::schedulable::Schedulable;
use pipeline_checkpoint::{SchedulerSnapshot, SnapshotSaver};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Programmatic scheduler configuration (§1 [ADDED]): save cadence and
/// directories, constructed in code — no env/CLI loading, which remains
/// out of scope.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Persist a snapshot every `save_step` rounds when a saver + key are
    /// configured. `0` disables periodic saving.
    pub save_step: u64,
    /// Opaque key passed to the configured [`SnapshotSaver`] on periodic
    /// saves (a directory path for a filesystem saver, a map key for an
    /// in-memory one).
    pub save_key: Option<String>,
    /// Key used for the error snapshot taken on an escalated agent
    /// error (§4.5 "Error escalation").
    pub error_key: Option<String>,
    /// Poll interval while a debugger's `is_pause` holds the scheduler
    /// (§4.5 step_all, §5 "the only non-busy wait").
    pub pause_poll_interval: Duration,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self {
            pause_poll_interval: Duration::from_millis(250),
            ..Default::default()
        }
    }
}

/// Shared state visible to every agent a scheduler owns (§3, §5).
///
/// A `std::sync::RwLock`, not `tokio::sync`: the scheduler's `step()` path
/// has no `.await` points, so no async-aware lock is needed — the lock
/// exists only so `global_state` can be shared by reference without
/// unsafe aliasing, not to arbitrate real concurrent access (§5 [ADDED]).
pub type GlobalState = Arc<RwLock<Value>>;

/// Drives a fixed set of [`Schedulable`]s (leaf agents or nested
/// schedulers) in round-robin order until the whole round produces no
/// work (§4.5).
pub struct Scheduler {
    uuid: Uuid,
    agents: Vec<Box<dyn Schedulable>>,
    agent_idx: usize,
    step_counter: u64,
    all_done_counter: usize,
    is_active: bool,
    global_state: Option<GlobalState>,
    config: SchedulerConfig,
    saver: Option<Arc<dyn SnapshotSaver>>,
    debugger: Arc<dyn DebuggerHook>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            agents: Vec::new(),
            agent_idx: 0,
            step_counter: 0,
            all_done_counter: 0,
            is_active: true,
            global_state: None,
            config,
            saver: None,
            debugger: Arc::new(NoopDebugger),
        }
    }

    pub fn with_debugger(mut self, debugger: Arc<dyn DebuggerHook>) -> Self {
        self.debugger = debugger;
        self
    }

    pub fn with_saver(mut self, saver: Arc<dyn SnapshotSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    pub fn with_global_state(mut self, state: Value) -> Self {
        self.global_state = Some(Arc::new(RwLock::new(state)));
        self
    }

    pub fn global_state(&self) -> Option<GlobalState> {
        self.global_state.clone()
    }

    /// Adds an agent (or nested scheduler) to the round-robin set. Mirrors
    /// the shared `global_state` reference onto it per §4.5 "Global
    /// state"; `pipeline-core` has no generic mechanism to push
    /// `global_state` into an arbitrary `Schedulable`, so callers wire it
    /// explicitly before calling `add_agent` if the agent needs it — the
    /// scheduler only guarantees the state itself is snapshotted.
    pub fn add_agent(&mut self, agent: Box<dyn Schedulable>) {
        self.agents.push(agent);
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn step_counter(&self) -> u64 {
        self.step_counter
    }

    /// One tick (§4.5 `step`): runs the agent at `agent_idx`, advances the
    /// cursor, and returns `false` once a full round has produced no
    /// work.
    pub fn step(&mut self) -> Result<bool> {
        if self.agents.is_empty() {
            return Ok(false);
        }

        let idx = self.agent_idx;
        let agent_uuid = self.agents[idx].uuid();
        self.debugger.start_agent(agent_uuid, self.step_counter);

        let did_run = if !self.agents[idx].is_active() {
            self.debugger.no_input(agent_uuid);
            false
        } else {
            match self.agents[idx].step() {
                Ok(did_run) => did_run,
                Err(e) => {
                    self.debugger.error_agent(agent_uuid, self.step_counter, &e.to_string());
                    if let (Some(saver), Some(key)) = (&self.saver, &self.config.error_key) {
                        if let Ok(snapshot) = self.snapshot() {
                            let saver = saver.clone();
                            let key = key.clone();
                            futures::executor::block_on(saver.save(&key, &snapshot)).ok();
                        }
                    }
                    return Err(PipelineError::Scheduler(format!(
                        "agent {agent_uuid} failed: {e}"
                    )));
                }
            }
        };

        self.debugger.finished_agent(agent_uuid, self.step_counter, did_run);
        self.agent_idx = (idx + 1) % self.agents.len();
        self.step_counter += 1;

        if did_run {
            self.all_done_counter = 0;
        } else {
            self.all_done_counter += 1;
        }

        if self.all_done_counter >= self.agents.len() {
            return Ok(false);
        }

        if self.agent_idx == 0 && self.config.save_step > 0 {
            let round = self.step_counter / self.agents.len() as u64;
            if round % self.config.save_step == 0 {
                if let (Some(saver), Some(key)) = (&self.saver, &self.config.save_key) {
                    let snapshot = self.snapshot()?;
                    let saver = saver.clone();
                    let key = key.clone();
                    futures::executor::block_on(saver.save(&key, &snapshot))?;
                }
            }
        }

        Ok(true)
    }

    /// Loops `step()` until quiescent. A debugger's `is_pause` is
    /// consulted each iteration and is the only place the scheduler
    /// blocks on a non-busy wait (§4.5, §5).
    ///
    /// If `validate_pipeline` is set, [`Scheduler::validate_pipeline`] runs
    /// first and any `Err` aborts before a single tick executes. If
    /// `clear_previous_outputs` is set, every agent's `unconnected_outputs`
    /// is cleared before the first tick (§4.5 `step_all`).
    pub fn step_all(&mut self, clear_previous_outputs: bool, validate_pipeline: bool) -> Result<()> {
        if validate_pipeline {
            self.validate_pipeline()?;
        }
        if clear_previous_outputs {
            self.clear_previous_outputs();
        }

        let mut pause_count = 0u64;
        loop {
            while self.debugger.is_pause(pause_count, self.step_counter) {
                pause_count += 1;
                std::thread::sleep(self.config.pause_poll_interval);
            }
            if !self.step()? {
                break;
            }
        }
        Ok(())
    }

    /// Every agent uuid declared an entry: its declared input schema is
    /// the infinite-source sentinel, or no OUT port anywhere targets its
    /// input port (§4.5 "Entry-agent detection").
    pub fn entry_agent_uuids(&self) -> Vec<Uuid> {
        let targeted: HashSet<Uuid> = self.agents.iter().flat_map(|a| a.declared_target_uuids()).collect();
        self.agents
            .iter()
            .filter(|a| a.is_infinite_source() || !targeted.contains(&a.uuid()))
            .map(|a| a.uuid())
            .collect()
    }

    /// Computes the transitive closure of agents reachable from the
    /// declared entry agents and requires every reachable agent to be
    /// present in `agents` — a dangling connection into an agent this
    /// scheduler never registered is a structural wiring bug, not a
    /// runtime condition (§4.5 `step_all(validate_pipeline=true)`).
    pub fn validate_pipeline(&self) -> Result<()> {
        let registered: HashSet<Uuid> = self.agents.iter().map(|a| a.uuid()).collect();
        let target_map: HashMap<Uuid, Vec<Uuid>> =
            self.agents.iter().map(|a| (a.uuid(), a.declared_target_uuids())).collect();

        let mut reachable: HashSet<Uuid> = HashSet::new();
        let mut frontier: Vec<Uuid> = self.entry_agent_uuids();
        reachable.extend(frontier.iter().copied());

        while let Some(uuid) = frontier.pop() {
            let Some(targets) = target_map.get(&uuid) else { continue };
            for &target in targets {
                if !registered.contains(&target) {
                    return Err(PipelineError::Validation(format!(
                        "agent {uuid} targets unregistered agent {target}"
                    )));
                }
                if reachable.insert(target) {
                    frontier.push(target);
                }
            }
        }
        Ok(())
    }

    /// Clears every agent's `unconnected_outputs` buffers (§4.5
    /// `step_all(clear_previous_outputs=true)`).
    pub fn clear_previous_outputs(&mut self) {
        for agent in &mut self.agents {
            agent.clear_outputs();
        }
    }

    /// Returns `{agent → list of all items in every unconnected_outputs
    /// across the agent's ports}` (§4.5 "Output harvesting"). Only
    /// meaningful once the pipeline is quiescent.
    pub fn get_final_outputs(&self) -> HashMap<Uuid, Vec<Value>> {
        self.agents
            .iter()
            .map(|a| (a.uuid(), a.final_outputs().into_values().flatten().collect()))
            .collect()
    }

    /// Drains one unconnected output from `agent_uuid`, across its
    /// output ports in declaration order (§4.5 `pop_one_output_for_agent`).
    pub fn pop_one_output_for_agent(&mut self, agent_uuid: Uuid) -> Option<Value> {
        self.agents
            .iter_mut()
            .find(|a| a.uuid() == agent_uuid)?
            .pop_one_output()
            .map(|(_, value)| value)
    }

    pub fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let mut agents = std::collections::HashMap::new();
        for agent in &self.agents {
            agents.insert(agent.uuid().to_string(), agent.save_state()?);
        }
        Ok(SchedulerSnapshot {
            is_active: self.is_active,
            agent_idx: self.agent_idx,
            step_counter: self.step_counter,
            all_done_counter: self.all_done_counter,
            global_state: self.global_state.as_ref().map(|s| s.read().unwrap().clone()),
            agents,
        })
    }

    /// Restores scheduler + per-agent state. Agents present in the live
    /// topology but absent from the snapshot keep their fresh state;
    /// entries for agents absent from the live topology are ignored
    /// (§4.6 "Restore semantics").
    pub fn restore(&mut self, snapshot: &SchedulerSnapshot) -> Result<()> {
        self.is_active = snapshot.is_active;
        self.agent_idx = snapshot.agent_idx;
        self.step_counter = snapshot.step_counter;
        self.all_done_counter = snapshot.all_done_counter;
        if let Some(state) = &snapshot.global_state {
            self.global_state = Some(Arc::new(RwLock::new(state.clone())));
        }
        for agent in &mut self.agents {
            if let Some(agent_snapshot) = snapshot.agents.get(&agent.uuid().to_string()) {
                agent.load_state(agent_snapshot)?;
            }
        }
        Ok(())
    }
}

impl Schedulable for Scheduler {
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
        Scheduler::step(self)
    }

    fn save_state(&self) -> Result<pipeline_checkpoint::AgentSnapshot> {
        let snapshot = self.snapshot()?;
        Ok(pipeline_checkpoint::AgentSnapshot {
            state: serde_json::to_value(&snapshot)?,
            is_active: self.is_active,
            ports: std::collections::HashMap::new(),
            collectors: std::collections::HashMap::new(),
        })
    }

    fn load_state(&mut self, snapshot: &pipeline_checkpoint::AgentSnapshot) -> Result<()> {
        let inner: SchedulerSnapshot = serde_json::from_value(snapshot.state.clone())?;
        self.restore(&inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentRuntime, IntoRunOutput, RunOutput, TypedOutputPort};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Msg(i32);

    struct Echo {
        id: Uuid,
    }

    impl Agent for Echo {
        type Input = Msg;
        fn uuid(&self) -> Uuid {
            self.id
        }
        fn run(&mut self, input: Msg, _correlation_id: Option<&str>) -> Result<RunOutput> {
            Ok(input.into_run_output())
        }
    }

    #[test]
    fn step_returns_false_once_quiescent() {
        let mut runtime = AgentRuntime::new(Echo { id: Uuid::new_v4() });
        runtime.add_output_port(Box::new(TypedOutputPort::<Msg>::new("out")));

        let mut scheduler = Scheduler::new(SchedulerConfig::new());
        scheduler.add_agent(Box::new(runtime));

        assert!(!scheduler.step().unwrap());
    }

    #[test]
    fn step_advances_round_robin_cursor_and_runs_fed_agent() {
        let mut runtime = AgentRuntime::new(Echo { id: Uuid::new_v4() });
        runtime.add_output_port(Box::new(TypedOutputPort::<Msg>::new("out")));
        runtime.feed(Msg(1), None).unwrap();

        let mut scheduler = Scheduler::new(SchedulerConfig::new());
        scheduler.add_agent(Box::new(runtime));

        assert!(scheduler.step().unwrap());
        assert_eq!(scheduler.step_counter(), 1);
    }

    #[test]
    fn empty_scheduler_is_immediately_quiescent() {
        let mut scheduler = Scheduler::new(SchedulerConfig::new());
        assert!(!scheduler.step().unwrap());
    }

    #[test]
    fn step_all_drains_a_two_agent_pipeline_and_harvests_final_outputs() {
        let mut source = AgentRuntime::new(Echo { id: Uuid::new_v4() });
        source.add_output_port(Box::new(TypedOutputPort::<Msg>::new("out")));
        let mut sink = AgentRuntime::new(Echo { id: Uuid::new_v4() });
        sink.add_output_port(Box::new(TypedOutputPort::<Msg>::new("out")));

        source.connect_to(&sink, None, None, None).unwrap();
        source.feed(Msg(7), None).unwrap();

        let source_uuid = source.uuid();
        let sink_uuid = sink.uuid();

        let mut scheduler = Scheduler::new(SchedulerConfig::new());
        scheduler.add_agent(Box::new(source));
        scheduler.add_agent(Box::new(sink));

        scheduler.step_all(true, true).unwrap();

        let outputs = scheduler.get_final_outputs();
        assert!(outputs.get(&source_uuid).unwrap().is_empty());
        assert_eq!(outputs.get(&sink_uuid).unwrap(), &vec![serde_json::json!(7)]);
    }

    #[test]
    fn entry_agent_uuids_excludes_agents_with_an_incoming_connection() {
        let mut source = AgentRuntime::new(Echo { id: Uuid::new_v4() });
        source.add_output_port(Box::new(TypedOutputPort::<Msg>::new("out")));
        let sink = AgentRuntime::new(Echo { id: Uuid::new_v4() });

        let source_uuid = source.uuid();
        let sink_uuid = sink.uuid();
        source.connect_to(&sink, None, None, None).unwrap();

        let mut scheduler = Scheduler::new(SchedulerConfig::new());
        scheduler.add_agent(Box::new(source));
        scheduler.add_agent(Box::new(sink));

        let entries = scheduler.entry_agent_uuids();
        assert_eq!(entries, vec![source_uuid]);
        assert!(!entries.contains(&sink_uuid));
        assert!(scheduler.validate_pipeline().is_ok());
    }
}
