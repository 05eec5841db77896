//! Passive observer interface (SPEC_FULL §4.7).
//!
//! All methods default to no-ops so implementors override only what they
//! need — the same ergonomics as the teacher's executor traits that
//! supply default trait-object-friendly bodies. Every method is
//! synchronous: a hook body must not itself suspend the scheduler, except
//! `is_pause`, the one explicit polling point (§5).

use serde_json::Value;
use uuid::Uuid;

/// Observer hook hung off a [`crate::scheduler::Scheduler`] and every
/// agent it owns.
///
/// Implementations must not mutate messages or agent state. Blocking
/// inside an event (other than `is_pause`) blocks the whole scheduler —
/// intentional, since debuggers use `is_pause` for cooperative pausing.
pub trait DebuggerHook: Send + Sync {
    fn transmission(&self, _src_agent: Uuid, _tgt_agent: Uuid, _payload: &Value, _parents: &[String]) {}

    fn input(&self, _agent: Uuid, _payload: &Value, _parents: &[String]) {}

    fn output(&self, _agent: Uuid, _payload: &Value, _parents: &[String]) {}

    fn no_input(&self, _agent: Uuid) {}

    fn start_agent(&self, _agent: Uuid, _step: u64) {}

    fn finished_agent(&self, _agent: Uuid, _step: u64, _did_run: bool) {}

    fn error_agent(&self, _agent: Uuid, _step: u64, _error: &str) {}

    /// Polled between scheduler iterations — the only non-busy wait in
    /// the system (§4.5). Default: never pause.
    fn is_pause(&self, _pause_count: u64, _step: u64) -> bool {
        false
    }

    fn user_message(&self, _name: &str, _agent: Option<Uuid>, _data: &Value) {}

    fn init_debugger(&self, _timeout_ms: Option<u64>) {}

    fn exit_debugger(&self) {}
}

/// No-op implementation, the default when no debugger is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDebugger;

impl DebuggerHook for NoopDebugger {}

/// Forwards every hook event to `tracing` spans/events instead of the
/// source's bare `print()` debugging (§4.7 [ADDED]). The one ambient,
/// in-scope implementation; concrete network/console/file transports
/// remain out of scope (§1).
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDebugger;

impl DebuggerHook for TracingDebugger {
    fn transmission(&self, src_agent: Uuid, tgt_agent: Uuid, payload: &Value, parents: &[String]) {
        tracing::debug!(%src_agent, %tgt_agent, ?payload, ?parents, "transmission");
    }

    fn input(&self, agent: Uuid, payload: &Value, parents: &[String]) {
        tracing::debug!(%agent, ?payload, ?parents, "input");
    }

    fn output(&self, agent: Uuid, payload: &Value, parents: &[String]) {
        tracing::debug!(%agent, ?payload, ?parents, "output");
    }

    fn no_input(&self, agent: Uuid) {
        tracing::trace!(%agent, "no_input");
    }

    fn start_agent(&self, agent: Uuid, step: u64) {
        tracing::debug!(%agent, step, "start_agent");
    }

    fn finished_agent(&self, agent: Uuid, step: u64, did_run: bool) {
        tracing::debug!(%agent, step, did_run, "finished_agent");
    }

    fn error_agent(&self, agent: Uuid, step: u64, error: &str) {
        tracing::error!(%agent, step, error, "error_agent");
    }

    fn user_message(&self, name: &str, agent: Option<Uuid>, data: &Value) {
        tracing::info!(name, ?agent, ?data, "user_message");
    }

    fn init_debugger(&self, timeout_ms: Option<u64>) {
        tracing::info!(?timeout_ms, "init_debugger");
    }

    fn exit_debugger(&self) {
        tracing::info!("exit_debugger");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_debugger_never_pauses() {
        let debugger = NoopDebugger;
        assert!(!debugger.is_pause(0, 0));
        assert!(!debugger.is_pause(1000, 50));
    }
}
