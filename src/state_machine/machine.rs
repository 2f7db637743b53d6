use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ProcessEvent,
    states::ProcessState,
};
use crate::models::Process;
use tracing::debug;

/// State machine wrapping one [`Process`] record.
///
/// Transitions are validated against the table in [`determine_target_state`]
/// and recorded as append-only status entries on the process. The machine
/// never talks to the status store; the lifecycle manager persists the
/// resulting record through its retrying writer.
///
/// [`determine_target_state`]: ProcessStateMachine::determine_target_state
#[derive(Debug)]
pub struct ProcessStateMachine {
    process: Process,
}

impl ProcessStateMachine {
    pub fn new(process: Process) -> Self {
        Self { process }
    }

    pub fn current_state(&self) -> ProcessState {
        self.process.state
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut Process {
        &mut self.process
    }

    pub fn into_process(self) -> Process {
        self.process
    }

    /// Attempt a transition, appending a status record with the given reason
    /// on success.
    pub fn transition(
        &mut self,
        event: ProcessEvent,
        reason: impl Into<String>,
    ) -> StateMachineResult<ProcessState> {
        let current = self.process.state;
        let target = Self::determine_target_state(current, &event)?;

        let reason = reason.into();
        debug!(
            process_id = %self.process.id,
            from = %current,
            to = %target,
            %reason,
            "Process state transition"
        );
        self.process.record_status(target, reason);

        if let ProcessEvent::Fail(message) = event {
            self.process.record_error(message);
        }

        Ok(target)
    }

    /// Determine the target state for an event, or reject the transition.
    pub fn determine_target_state(
        current: ProcessState,
        event: &ProcessEvent,
    ) -> StateMachineResult<ProcessState> {
        if current.is_terminal() {
            return Err(StateMachineError::TerminalState {
                state: current.to_string(),
            });
        }

        let target = match (current, event) {
            // Failure and cancellation are reachable from any non-terminal
            // state.
            (_, ProcessEvent::Fail(_)) => ProcessState::Failed,
            (ProcessState::Canceling, ProcessEvent::CancelConfirmed) => ProcessState::Canceled,
            (_, ProcessEvent::Cancel) => ProcessState::Canceling,

            (ProcessState::Created, ProcessEvent::Validate) => ProcessState::Validated,
            (ProcessState::Validated, ProcessEvent::Start) => ProcessState::Started,

            // Phase ordering follows the task chain, not the nominal state
            // order, so phases may be entered from any running state.
            (from, ProcessEvent::EnterPhase(phase))
                if phase.is_phase() && from != ProcessState::Canceling =>
            {
                *phase
            }

            (
                ProcessState::Executing
                | ProcessState::Monitoring
                | ProcessState::OutputDataStaging
                | ProcessState::PostProcessing,
                ProcessEvent::Complete,
            ) => ProcessState::Completed,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from.to_string(),
                    event: format!("{event:?}"),
                })
            }
        };

        Ok(target)
    }
}
