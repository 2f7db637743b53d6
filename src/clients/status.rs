//! Status registry clients.
//!
//! The manager reports every process and task state change to an external
//! status store (`POST /process/{id}/status` shaped). Store unreachability is
//! a transient infrastructure condition: the [`RetryingStatusWriter`] retries
//! with bounded exponential backoff and escalates to an operator alert on
//! exhaustion, leaving the process in its last known state. It never turns
//! infrastructure flakiness into a process failure.

use crate::error::{GridflowError, Result};
use crate::events::StatusEventPublisher;
use crate::models::{ProcessId, RemoteJobId, TaskId};
use crate::resilience::{retry_with_backoff, BackoffPolicy};
use crate::state_machine::{ProcessState, TaskRunState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Errors from the status registry collaborator.
#[derive(Debug, Error, Clone)]
pub enum StatusClientError {
    /// The store could not be reached; retryable.
    #[error("status store unreachable: {0}")]
    Unreachable(String),

    /// The store rejected the update; not retryable.
    #[error("status update rejected: {0}")]
    Rejected(String),
}

impl StatusClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Payload for `POST /process/{processId}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatusUpdate {
    pub state: ProcessState,
    pub time_of_state_change: DateTime<Utc>,
    pub reason: String,
}

/// Payload for the task status endpoint; carries associated remote-job ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    pub state: TaskRunState,
    pub time_of_state_change: DateTime<Utc>,
    pub reason: String,
    pub remote_job_ids: Vec<RemoteJobId>,
}

#[async_trait]
pub trait ProcessStatusClient: Send + Sync {
    async fn post_process_status(
        &self,
        process_id: ProcessId,
        update: ProcessStatusUpdate,
    ) -> std::result::Result<(), StatusClientError>;
}

#[async_trait]
pub trait TaskStatusClient: Send + Sync {
    async fn post_task_status(
        &self,
        task_id: TaskId,
        update: TaskStatusUpdate,
    ) -> std::result::Result<(), StatusClientError>;
}

/// In-memory status store. Also the test double: `fail_next` makes the next
/// N calls return `Unreachable`.
#[derive(Debug, Default)]
pub struct InMemoryStatusClient {
    process_updates: DashMap<ProcessId, Vec<ProcessStatusUpdate>>,
    task_updates: DashMap<TaskId, Vec<TaskStatusUpdate>>,
    fail_next: AtomicU32,
}

impl InMemoryStatusClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` posts fail as unreachable.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn process_history(&self, process_id: ProcessId) -> Vec<ProcessStatusUpdate> {
        self.process_updates
            .get(&process_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn task_history(&self, task_id: TaskId) -> Vec<TaskStatusUpdate> {
        self.task_updates
            .get(&task_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    fn check_failure(&self) -> std::result::Result<(), StatusClientError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(StatusClientError::Unreachable(
                "injected failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessStatusClient for InMemoryStatusClient {
    async fn post_process_status(
        &self,
        process_id: ProcessId,
        update: ProcessStatusUpdate,
    ) -> std::result::Result<(), StatusClientError> {
        self.check_failure()?;
        self.process_updates
            .entry(process_id)
            .or_default()
            .push(update);
        Ok(())
    }
}

#[async_trait]
impl TaskStatusClient for InMemoryStatusClient {
    async fn post_task_status(
        &self,
        task_id: TaskId,
        update: TaskStatusUpdate,
    ) -> std::result::Result<(), StatusClientError> {
        self.check_failure()?;
        self.task_updates.entry(task_id).or_default().push(update);
        Ok(())
    }
}

/// Status writer wrapping both clients with the configured backoff policy.
#[derive(Clone)]
pub struct RetryingStatusWriter {
    process_client: Arc<dyn ProcessStatusClient>,
    task_client: Arc<dyn TaskStatusClient>,
    policy: BackoffPolicy,
    publisher: StatusEventPublisher,
}

impl RetryingStatusWriter {
    pub fn new(
        process_client: Arc<dyn ProcessStatusClient>,
        task_client: Arc<dyn TaskStatusClient>,
        policy: BackoffPolicy,
        publisher: StatusEventPublisher,
    ) -> Self {
        Self {
            process_client,
            task_client,
            policy,
            publisher,
        }
    }

    /// Write a process status update, retrying transient failures. On
    /// exhaustion: error log, operator alert, `TransientInfrastructure`.
    pub async fn write_process_status(
        &self,
        process_id: ProcessId,
        update: ProcessStatusUpdate,
    ) -> Result<()> {
        let operation = "process status update";
        let result = retry_with_backoff(
            &self.policy,
            operation,
            StatusClientError::is_transient,
            || {
                self.process_client
                    .post_process_status(process_id, update.clone())
            },
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(
                    %process_id,
                    state = %update.state,
                    error = %err,
                    "Process status update failed after retries; process stays in last known state"
                );
                self.publisher.publish_alert(operation, err.to_string());
                Err(GridflowError::transient(operation, err))
            }
        }
    }

    /// Write a task status update, same retry and escalation contract.
    pub async fn write_task_status(&self, task_id: TaskId, update: TaskStatusUpdate) -> Result<()> {
        let operation = "task status update";
        let result = retry_with_backoff(
            &self.policy,
            operation,
            StatusClientError::is_transient,
            || self.task_client.post_task_status(task_id, update.clone()),
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(%task_id, error = %err, "Task status update failed after retries");
                self.publisher.publish_alert(operation, err.to_string());
                Err(GridflowError::transient(operation, err))
            }
        }
    }
}
