use crate::models::{ProcessId, RemoteJobId, TaskId, TaskKind};
use crate::state_machine::TaskRunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A task state change flowing back to the lifecycle managers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub process_id: ProcessId,
    pub task_id: TaskId,
    pub task_kind: TaskKind,
    pub state: TaskRunState,
    pub remote_job: Option<RemoteJobId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Events carried on the status channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GridflowEvent {
    TaskStatus(TaskStatusEvent),
    /// Raised when retries against an external collaborator are exhausted.
    /// The affected process stays in its last known state; an operator has
    /// to look at it.
    OperatorAlert {
        operation: String,
        message: String,
        occurred_at: DateTime<Utc>,
    },
}

/// Fire-and-forget publisher for task status events and operator alerts.
#[derive(Debug, Clone)]
pub struct StatusEventPublisher {
    sender: broadcast::Sender<GridflowEvent>,
}

impl StatusEventPublisher {
    /// Create a new publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a task status change.
    pub fn publish_task_status(&self, event: TaskStatusEvent) {
        // A send error means no subscribers, which is fine for best-effort
        // delivery.
        let _ = self.sender.send(GridflowEvent::TaskStatus(event));
    }

    /// Publish an operator alert.
    pub fn publish_alert(&self, operation: impl Into<String>, message: impl Into<String>) {
        let _ = self.sender.send(GridflowEvent::OperatorAlert {
            operation: operation.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        });
    }

    /// Subscribe to the status channel.
    pub fn subscribe(&self) -> broadcast::Receiver<GridflowEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
