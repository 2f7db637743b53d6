//! Process model: one scientific-computing execution instance and the
//! compute/data-staging configuration it was scheduled with.

use super::{ProcessId, TaskRecord};
use crate::state_machine::states::ProcessState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Compute backend families supported by the task factories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Commands run on the orchestrator host itself.
    Local,
    /// Remote batch scheduler reached over a secure-shell session.
    Hpc,
    /// Cloud IaaS reached through a REST API with access-key credentials.
    Cloud,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Hpc => write!(f, "hpc"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

/// Where and how a process executes: target backend, host, directory layout
/// and the credential token used to authenticate against the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeDescriptor {
    pub backend: BackendKind,
    /// Target host for remote backends; ignored for local execution.
    pub host: String,
    /// Scratch directory the process works in on the backend.
    pub working_dir: PathBuf,
    /// Source location for input staging.
    pub input_dir: PathBuf,
    /// Destination location for output staging.
    pub output_dir: PathBuf,
    /// Token resolved through the credential collaborator at task run time.
    pub credential_token: String,
    /// Owner the credential lookup is scoped to.
    pub owner: String,
}

/// One entry in a process's append-only status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatusRecord {
    pub state: ProcessState,
    pub time_of_state_change: DateTime<Utc>,
    /// Display-ready explanation of the transition.
    pub reason: String,
}

/// An error recorded against a process. Kept alongside the status history so
/// callers can surface failures without inspecting logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessError {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// One scientific-computing execution instance.
///
/// Mutated exclusively by its process lifecycle manager. Reaching
/// `Completed`, `Failed` or `Canceled` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub experiment_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: ProcessState,
    /// Linear task chain, ordered by task index.
    pub tasks: Vec<TaskRecord>,
    pub status_history: Vec<ProcessStatusRecord>,
    pub errors: Vec<ProcessError>,
    pub compute: ComputeDescriptor,
    /// Position of the next task expected to complete. Advances
    /// monotonically; recovery resumes from here, never from zero.
    pub current_task_index: usize,
}

impl Process {
    pub fn new(experiment_id: impl Into<String>, compute: ComputeDescriptor) -> Self {
        let now = Utc::now();
        Self {
            id: ProcessId::new(),
            experiment_id: experiment_id.into(),
            created_at: now,
            updated_at: now,
            state: ProcessState::default(),
            tasks: Vec::new(),
            status_history: Vec::new(),
            errors: Vec::new(),
            compute,
            current_task_index: 0,
        }
    }

    /// Append a status record and move to the given state. Callers go through
    /// the state machine, which validates the transition first.
    pub fn record_status(&mut self, state: ProcessState, reason: impl Into<String>) {
        let now = Utc::now();
        self.status_history.push(ProcessStatusRecord {
            state,
            time_of_state_change: now,
            reason: reason.into(),
        });
        self.state = state;
        self.updated_at = now;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(ProcessError {
            message: message.into(),
            occurred_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ComputeDescriptor {
        ComputeDescriptor {
            backend: BackendKind::Local,
            host: "localhost".to_string(),
            working_dir: PathBuf::from("/tmp/work"),
            input_dir: PathBuf::from("/tmp/in"),
            output_dir: PathBuf::from("/tmp/out"),
            credential_token: "token".to_string(),
            owner: "alice".to_string(),
        }
    }

    #[test]
    fn status_history_is_append_only() {
        let mut process = Process::new("exp-1", descriptor());
        process.record_status(ProcessState::Validated, "validated");
        process.record_status(ProcessState::Started, "started");

        assert_eq!(process.state, ProcessState::Started);
        assert_eq!(process.status_history.len(), 2);
        assert_eq!(process.status_history[0].state, ProcessState::Validated);
        assert_eq!(process.status_history[0].reason, "validated");
    }

    #[test]
    fn new_process_starts_at_created_with_index_zero() {
        let process = Process::new("exp-1", descriptor());
        assert_eq!(process.state, ProcessState::Created);
        assert_eq!(process.current_task_index, 0);
        assert!(process.status_history.is_empty());
    }
}
