//! # Tasks
//!
//! The atomic, resumable units of work a process pipeline is made of. Each
//! task type implements one uniform contract: [`Task::run`] produces a
//! [`TaskResult`] (completed or failed, with a display-ready message), and
//! [`Task::cancel`] performs best-effort teardown that never propagates
//! sub-step errors.
//!
//! A task never panics or leaks errors past the contract boundary: failures
//! of the work itself become a `Failed` result, while infrastructure faults
//! (could not even talk to the backend) come back as `Err(..)` so the
//! lifecycle layer can tell the two apart and retry only the latter.

pub mod cloud_job;
pub mod env;
pub mod factory;
pub mod finalize;
pub mod job;
pub mod noop;
pub mod staging;

pub use cloud_job::CloudJobTask;
pub use env::{EnvCleanupTask, EnvSetupTask};
pub use factory::TaskFactory;
pub use finalize::{CompletingTask, ParsingTriggerTask};
pub use job::{JobSubmissionTask, MonitoringTask};
pub use noop::NoOpTask;
pub use staging::{ArchiveTask, InputStagingTask, OutputStagingTask};

use crate::backends::{BackendError, ResourceClient};
use crate::clients::PasswordCredential;
use crate::config::GridflowConfig;
use crate::error::{GridflowError, Result};
use crate::models::{ComputeDescriptor, ProcessId, RemoteJobId, TaskKind, TaskRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Terminal status of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResultStatus {
    Completed,
    Failed,
}

/// Outcome of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskResultStatus,
    /// Human-readable, suitable for the status history.
    pub message: String,
    /// Remote job dispatched by this execution, if any.
    pub remote_job: Option<RemoteJobId>,
}

impl TaskResult {
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            status: TaskResultStatus::Completed,
            message: message.into(),
            remote_job: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: TaskResultStatus::Failed,
            message: message.into(),
            remote_job: None,
        }
    }

    pub fn with_remote_job(mut self, job_id: RemoteJobId) -> Self {
        self.remote_job = Some(job_id);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskResultStatus::Completed
    }
}

/// Explicit per-invocation execution context. Everything a task needs
/// arrives here; tasks hold no mutable state of their own.
#[derive(Clone)]
pub struct TaskContext {
    pub process_id: ProcessId,
    /// Snapshot of the task's record (parameters, index, prior history).
    pub record: TaskRecord,
    pub compute: ComputeDescriptor,
    pub client: Arc<dyn ResourceClient>,
    /// Resolved for this execution only; never cached across executions.
    pub credential: Option<PasswordCredential>,
    /// Most recent remote job dispatched by any task of this process.
    pub remote_job: Option<RemoteJobId>,
    pub config: Arc<GridflowConfig>,
}

impl TaskContext {
    /// Required string parameter; missing or non-string is a validation
    /// failure.
    pub fn required_param(&self, key: &str) -> Result<String> {
        self.record
            .parameters
            .get(key)
            .and_then(|value| value.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| {
                GridflowError::validation(format!(
                    "task {} is missing required parameter `{key}`",
                    self.record.id
                ))
            })
    }

    pub fn optional_param(&self, key: &str) -> Option<String> {
        self.record
            .parameters
            .get(key)
            .and_then(|value| value.as_str())
            .map(ToString::to_string)
    }
}

/// The uniform task contract.
#[async_trait]
pub trait Task: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Execute the task. `Ok(TaskResult)` covers both success and failure of
    /// the work. `Err(Validation)` fails fast before any backend call and is
    /// recorded as FAILED by the executor; any other `Err(..)` is an
    /// infrastructure fault the caller may retry.
    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult>;

    /// Best-effort teardown of any resources the task owns. Sub-step
    /// failures are logged by the implementation, never returned.
    async fn cancel(&self, ctx: &TaskContext);
}

/// One pipeline slot: the durable record plus its executable task.
#[derive(Clone)]
pub struct ChainedTask {
    pub record: TaskRecord,
    pub task: Arc<dyn Task>,
}

/// Turn a backend error into the right side of the task contract: transient
/// errors become infrastructure faults, everything else a failed result.
pub(crate) fn backend_outcome(operation: &str, err: BackendError) -> Result<TaskResult> {
    if err.is_transient() {
        Err(GridflowError::transient(operation, err))
    } else {
        Ok(TaskResult::failed(format!("{operation}: {err}")))
    }
}
