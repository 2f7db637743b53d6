use super::states::ProcessState;
use serde::{Deserialize, Serialize};

/// Events that drive process state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "data")]
pub enum ProcessEvent {
    /// Created -> Validated: parameters and configuration checked.
    Validate,
    /// Validated -> Started: a lifecycle manager took ownership.
    Start,
    /// Enter an execution-phase state. Phases follow the task chain, so any
    /// phase is reachable from any non-terminal, non-canceling state.
    EnterPhase(ProcessState),
    /// Final task completed.
    Complete,
    /// A task failed; carries the display-ready reason.
    Fail(String),
    /// Cancellation requested by a user or the recovery handler.
    Cancel,
    /// Best-effort teardown finished (successfully or not).
    CancelConfirmed,
}
