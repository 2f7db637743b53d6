//! Crate-wide error taxonomy.
//!
//! The orchestration core distinguishes four failure families with different
//! handling: transient infrastructure errors (retried with backoff, then
//! escalated while the process stays in its last known state), task execution
//! failures (deterministic process failure, no pipeline retry), validation
//! errors (fail fast before any backend call) and cancellation (not a
//! failure; drives the canceling path).

use crate::models::{ProcessId, TaskId};
use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridflowError {
    /// Network/connection hiccups, unreachable collaborators, deadline
    /// expiry while waiting on a backend. Retryable.
    #[error("transient infrastructure error during {operation}: {message}")]
    TransientInfrastructure { operation: String, message: String },

    /// The task ran but the underlying job or command failed. Not retried at
    /// the pipeline level.
    #[error("task {task_id} failed: {reason}")]
    TaskExecutionFailure { task_id: TaskId, reason: String },

    /// Malformed task parameters or missing prerequisite data.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// Cancellation was requested; not a failure.
    #[error("cancellation requested for process {process_id}")]
    CancellationRequested { process_id: ProcessId },

    #[error("state transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GridflowError {
    pub fn transient(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::TransientInfrastructure {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn task_failure(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self::TaskExecutionFailure {
            task_id,
            reason: reason.into(),
        }
    }

    /// Whether retry-with-backoff applies to this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientInfrastructure { .. })
    }
}

impl From<config::ConfigError> for GridflowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GridflowError>;
