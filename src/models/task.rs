//! Task model: one step in a process pipeline with an append-only status log.

use super::{ProcessId, RemoteJobId, TaskId};
use crate::state_machine::states::TaskRunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Task type slots in the pipeline. All backends share a uniform chain shape;
/// slots that are vacuous on a given backend are filled with no-op tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    EnvSetup,
    InputStaging,
    JobSubmission,
    OutputStaging,
    EnvCleanup,
    Monitoring,
    Archive,
    Completing,
    ParsingTrigger,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EnvSetup => "env_setup",
            Self::InputStaging => "input_staging",
            Self::JobSubmission => "job_submission",
            Self::OutputStaging => "output_staging",
            Self::EnvCleanup => "env_cleanup",
            Self::Monitoring => "monitoring",
            Self::Archive => "archive",
            Self::Completing => "completing",
            Self::ParsingTrigger => "parsing_trigger",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env_setup" => Ok(Self::EnvSetup),
            "input_staging" => Ok(Self::InputStaging),
            "job_submission" => Ok(Self::JobSubmission),
            "output_staging" => Ok(Self::OutputStaging),
            "env_cleanup" => Ok(Self::EnvCleanup),
            "monitoring" => Ok(Self::Monitoring),
            "archive" => Ok(Self::Archive),
            "completing" => Ok(Self::Completing),
            "parsing_trigger" => Ok(Self::ParsingTrigger),
            _ => Err(format!("Invalid task kind: {s}")),
        }
    }
}

/// One entry in a task's append-only status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub state: TaskRunState,
    pub time_of_state_change: DateTime<Utc>,
    pub reason: String,
}

/// One step in a process's pipeline.
///
/// Status transitions are independent records, never overwritten, so the full
/// audit history survives the task's logical completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub process_id: ProcessId,
    /// Position in the process's ordered chain.
    pub index: usize,
    /// String-keyed parameter bag, passed to the task at run time.
    pub parameters: HashMap<String, serde_json::Value>,
    pub status_history: Vec<TaskStatusRecord>,
    /// Remote jobs this task dispatched, most recent last.
    pub remote_jobs: Vec<RemoteJobId>,
}

impl TaskRecord {
    pub fn new(kind: TaskKind, process_id: ProcessId, index: usize) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            process_id,
            index,
            parameters: HashMap::new(),
            status_history: Vec::new(),
            remote_jobs: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Most recent recorded state, or `Created` when nothing has run yet.
    pub fn current_state(&self) -> TaskRunState {
        self.status_history
            .last()
            .map(|record| record.state)
            .unwrap_or_default()
    }

    pub fn record_status(&mut self, state: TaskRunState, reason: impl Into<String>) {
        self.status_history.push(TaskStatusRecord {
            state,
            time_of_state_change: Utc::now(),
            reason: reason.into(),
        });
    }

    pub fn add_remote_job(&mut self, job_id: RemoteJobId) {
        self.remote_jobs.push(job_id);
    }

    /// The remote job currently associated with this task, if any. At most
    /// one remote job is active per submission task at a time, so the most
    /// recent id is the live one.
    pub fn active_remote_job(&self) -> Option<&RemoteJobId> {
        self.remote_jobs.last()
    }
}
