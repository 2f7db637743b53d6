//! Typed execution queues.
//!
//! Each task kind routes to one of five bounded queues so a flood of staging
//! work cannot starve job submission. Routing also fixes the process phase
//! entered when a task of that kind is submitted; queue and phase are applied
//! together by the lifecycle manager as one logical step.

use crate::models::{ProcessId, TaskId, TaskKind};
use crate::state_machine::ProcessState;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// The five typed queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    IngressStaging,
    EgressStaging,
    EnvSetup,
    EnvCleanup,
    JobSubmission,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::IngressStaging,
        QueueName::EgressStaging,
        QueueName::EnvSetup,
        QueueName::EnvCleanup,
        QueueName::JobSubmission,
    ];
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IngressStaging => "ingress-staging",
            Self::EgressStaging => "egress-staging",
            Self::EnvSetup => "env-setup",
            Self::EnvCleanup => "env-cleanup",
            Self::JobSubmission => "job-submission",
        };
        write!(f, "{name}")
    }
}

/// Queue a task kind executes on.
pub fn queue_for(kind: TaskKind) -> QueueName {
    match kind {
        TaskKind::InputStaging => QueueName::IngressStaging,
        TaskKind::OutputStaging | TaskKind::Archive => QueueName::EgressStaging,
        TaskKind::EnvSetup => QueueName::EnvSetup,
        TaskKind::EnvCleanup => QueueName::EnvCleanup,
        TaskKind::JobSubmission
        | TaskKind::Monitoring
        | TaskKind::Completing
        | TaskKind::ParsingTrigger => QueueName::JobSubmission,
    }
}

/// Process phase entered when a task of this kind is submitted.
pub fn phase_for(kind: TaskKind) -> ProcessState {
    match kind {
        TaskKind::EnvSetup => ProcessState::ConfiguringWorkspace,
        TaskKind::InputStaging => ProcessState::InputDataStaging,
        TaskKind::JobSubmission => ProcessState::Executing,
        TaskKind::Monitoring => ProcessState::Monitoring,
        TaskKind::OutputStaging | TaskKind::Archive => ProcessState::OutputDataStaging,
        TaskKind::EnvCleanup | TaskKind::Completing | TaskKind::ParsingTrigger => {
            ProcessState::PostProcessing
        }
    }
}

/// A unit of queued work. The consumer resolves the owning manager and asks
/// it to execute the task; redelivery is tolerated because execution is
/// idempotent at the manager boundary.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub process_id: ProcessId,
    pub task_id: TaskId,
    pub kind: TaskKind,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} is closed")]
    Closed(QueueName),
}

/// Sender side of the five queues. Cheap to clone; every lifecycle manager
/// holds one.
#[derive(Clone)]
pub struct TaskQueues {
    senders: HashMap<QueueName, mpsc::Sender<QueuedTask>>,
}

/// Receiver side, handed to the queue workers exactly once.
pub struct TaskQueueReceivers {
    receivers: Vec<(QueueName, mpsc::Receiver<QueuedTask>)>,
}

impl TaskQueueReceivers {
    pub fn into_inner(self) -> Vec<(QueueName, mpsc::Receiver<QueuedTask>)> {
        self.receivers
    }
}

impl TaskQueues {
    /// Create the queue set with the given per-queue capacity.
    pub fn bounded(capacity: usize) -> (Self, TaskQueueReceivers) {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for queue in QueueName::ALL {
            let (tx, rx) = mpsc::channel(capacity);
            senders.insert(queue, tx);
            receivers.push((queue, rx));
        }
        (Self { senders }, TaskQueueReceivers { receivers })
    }

    /// Enqueue a task, waiting if the queue is at capacity.
    pub async fn submit(&self, queue: QueueName, task: QueuedTask) -> Result<(), QueueError> {
        // Senders exist for every QueueName by construction.
        let sender = self
            .senders
            .get(&queue)
            .ok_or(QueueError::Closed(queue))?;
        sender
            .send(task)
            .await
            .map_err(|_| QueueError::Closed(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_routes_to_a_queue_and_phase() {
        let kinds = [
            TaskKind::EnvSetup,
            TaskKind::InputStaging,
            TaskKind::JobSubmission,
            TaskKind::Monitoring,
            TaskKind::OutputStaging,
            TaskKind::Archive,
            TaskKind::EnvCleanup,
            TaskKind::Completing,
            TaskKind::ParsingTrigger,
        ];
        for kind in kinds {
            assert!(phase_for(kind).is_phase(), "{kind} must map to a phase");
        }
        assert_eq!(queue_for(TaskKind::InputStaging), QueueName::IngressStaging);
        assert_eq!(queue_for(TaskKind::Archive), QueueName::EgressStaging);
        assert_eq!(queue_for(TaskKind::Monitoring), QueueName::JobSubmission);
        assert_eq!(phase_for(TaskKind::JobSubmission), ProcessState::Executing);
        assert_eq!(phase_for(TaskKind::EnvCleanup), ProcessState::PostProcessing);
    }

    #[tokio::test]
    async fn submit_and_receive() {
        let (queues, receivers) = TaskQueues::bounded(4);
        let mut receivers = receivers.into_inner();
        let task = QueuedTask {
            process_id: ProcessId::new(),
            task_id: TaskId::new(),
            kind: TaskKind::EnvSetup,
        };

        queues
            .submit(QueueName::EnvSetup, task.clone())
            .await
            .unwrap();

        let (_, env_setup_rx) = receivers
            .iter_mut()
            .find(|(name, _)| *name == QueueName::EnvSetup)
            .unwrap();
        let received = env_setup_rx.recv().await.unwrap();
        assert_eq!(received.task_id, task.task_id);
    }

    #[tokio::test]
    async fn submit_to_closed_queue_fails() {
        let (queues, receivers) = TaskQueues::bounded(4);
        drop(receivers);

        let result = queues
            .submit(
                QueueName::JobSubmission,
                QueuedTask {
                    process_id: ProcessId::new(),
                    task_id: TaskId::new(),
                    kind: TaskKind::JobSubmission,
                },
            )
            .await;
        assert!(matches!(result, Err(QueueError::Closed(_))));
    }
}
