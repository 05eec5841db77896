//! # pipeline-core — cooperative agent pipeline runtime
//!
//! A typed message-passing graph of cooperating agents, round-robin
//! cooperatively scheduled, with provenance-based fan-out/fan-in
//! synchronization and snapshot/restore. See `SPEC_FULL.md` for the full
//! specification this crate implements.
//!
//! ## Module map
//!
//! - [`provenance`] — [`ProvenanceSegment`]/[`ProvenanceChain`] (§3).
//! - [`port`] — [`InputPort`]/[`OutputPort`]/[`Envelope`]/[`Connection`] (§4.1).
//! - [`agent`] — the [`Agent`] trait, [`AgentRuntime`], output routing
//!   (§4.2).
//! - [`multi_input`] — [`MultiInputAgent`], round-robin and aggregate
//!   join modes (§4.3).
//! - [`collector`] — [`ListCollectorPort`] (§4.4).
//! - [`scheduler`] — [`Scheduler`], [`SchedulerConfig`] (§4.5).
//! - [`schedulable`] — the [`Schedulable`] trait shared by agents and
//!   schedulers (§9).
//! - [`debugger`] — [`DebuggerHook`], [`NoopDebugger`], [`TracingDebugger`]
//!   (§4.7).
//! - [`error`] — [`PipelineError`].
//!
//! Snapshot persistence types ([`pipeline_checkpoint::SchedulerSnapshot`],
//! [`pipeline_checkpoint::SnapshotSaver`]) live in the sibling
//! `pipeline-checkpoint` crate and are re-exported here for convenience.

pub mod agent;
pub mod collector;
pub mod debugger;
pub mod error;
pub mod multi_input;
pub mod port;
pub mod provenance;
pub mod schedulable;
pub mod scheduler;

pub use agent::{
    Agent, AgentRuntime, BoxedPayload, ErasedOutputPort, IdWrapper, InfiniteInputMarker,
    IntoRunOutput, NullPayload, RunOutput, TypedOutputPort,
};
pub use collector::{CollectorError, ListCollectorPort, ListModel};
pub use debugger::{DebuggerHook, NoopDebugger, TracingDebugger};
pub use error::{PipelineError, Result};
pub use multi_input::{ErasedInputPort, JoinedInput, MultiInputAgent, MultiInputLogic, TypedInputSlot};
pub use port::{Connection, ConnectionTarget, Envelope, InputPort, OutputPort, SharedInputPort};
pub use provenance::{ProvenanceChain, ProvenanceSegment};
pub use schedulable::Schedulable;
pub use scheduler::{GlobalState, Scheduler, SchedulerConfig};

pub use pipeline_checkpoint::{Payload, SchedulerSnapshot, SnapshotSaver};
