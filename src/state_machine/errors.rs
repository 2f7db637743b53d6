use thiserror::Error;

/// Errors raised by process state transitions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("process is in terminal state {state} and accepts no further events")]
    TerminalState { state: String },

    #[error("internal state machine error: {0}")]
    Internal(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
