//! Error types for pipeline construction and execution.
//!
//! # Error Categories
//!
//! ```text
//! PipelineError
//! ├── Transform        - a port transform/condition closure failed
//! ├── Run              - an agent's run() returned an application error
//! ├── PortResolution   - output routing found no matching port for a type
//! ├── Validation       - pipeline wiring is structurally invalid
//! ├── Snapshot         - checkpoint save/load failed
//! └── Scheduler        - scheduling invariant violated
//! ```

use thiserror::Error;

/// Convenience result type using [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while wiring, running, or checkpointing a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A port's transform or condition closure returned an error.
    #[error("transform failed on port '{port}': {source}")]
    Transform {
        port: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An agent's `run()` returned an application-level error.
    #[error("agent '{agent}' run failed: {source}")]
    Run {
        agent: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Output routing found no output port registered for a produced
    /// message's `TypeId` (SPEC_FULL §3/§9).
    #[error("agent '{agent}' produced a message with no matching output port")]
    PortResolution { agent: String },

    /// Pipeline wiring is structurally invalid: a dangling connection, a
    /// multi-input agent wired to only one producer, a duplicate agent
    /// uuid, etc.
    #[error("invalid pipeline configuration: {0}")]
    Validation(String),

    /// Snapshot save/load failed. Wraps
    /// `pipeline_checkpoint::SnapshotError`.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] pipeline_checkpoint::SnapshotError),

    /// A scheduler invariant was violated (e.g. `step()` called with no
    /// active agents, a restored snapshot referencing an unknown agent
    /// uuid in strict mode).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// JSON encode/decode failure outside of the snapshot path (e.g.
    /// decoding a payload at a port boundary).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn transform(port: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transform {
            port: port.into(),
            source: Box::new(source),
        }
    }

    pub fn run(agent: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Run {
            agent: agent.into(),
            source: Box::new(source),
        }
    }

    pub fn port_resolution(agent: impl Into<String>) -> Self {
        Self::PortResolution { agent: agent.into() }
    }
}
