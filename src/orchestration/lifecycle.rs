//! # Process Lifecycle Manager
//!
//! One manager owns one process: its ordered task chain, its state machine
//! and the routing of each task to the right typed queue. Task state changes
//! arrive exclusively through [`on_task_state_changed`], delivered by the
//! event pump; everything else (queue workers, status writes, checkpointing)
//! hangs off that single trigger.
//!
//! Concurrency contract: events for different processes are handled
//! concurrently, events for one process are serialized behind the manager's
//! async mutex. Duplicate and stale events (position behind the current task
//! pointer, events after a terminal state) are no-ops.
//!
//! [`on_task_state_changed`]: ProcessLifecycleManager::on_task_state_changed

use super::queues::{phase_for, queue_for, QueuedTask, TaskQueueReceivers, TaskQueues};
use crate::backends::ResourceClient;
use crate::clients::{
    CredentialClient, CredentialError, ProcessStore, ProcessStatusUpdate, RetryingStatusWriter,
    TaskStatusUpdate,
};
use crate::config::GridflowConfig;
use crate::error::{GridflowError, Result};
use crate::events::{GridflowEvent, StatusEventPublisher, TaskStatusEvent};
use crate::models::{
    BackendKind, ComputeDescriptor, Process, ProcessId, RemoteJobId, TaskId, TaskRecord,
};
use crate::resilience::retry_with_backoff;
use crate::state_machine::{ProcessEvent, ProcessState, ProcessStateMachine, TaskRunState};
use crate::tasks::{ChainedTask, Task, TaskContext};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared collaborators every manager needs. Cheap to clone; the recovery
/// handler reuses one set across all rebuilt managers.
#[derive(Clone)]
pub struct ManagerDeps {
    pub queues: TaskQueues,
    pub status_writer: RetryingStatusWriter,
    pub store: Arc<dyn ProcessStore>,
    pub publisher: StatusEventPublisher,
    pub credentials: Arc<dyn CredentialClient>,
    pub config: Arc<GridflowConfig>,
}

/// Mutable manager state, guarded by one async mutex per process.
struct ManagerState {
    machine: ProcessStateMachine,
    /// Executable side of the chain, parallel to `process.tasks` by position.
    executables: Vec<Arc<dyn Task>>,
    /// Task id to chain position.
    positions: HashMap<TaskId, usize>,
}

pub struct ProcessLifecycleManager {
    process_id: ProcessId,
    state: Mutex<ManagerState>,
    client: Arc<dyn ResourceClient>,
    queues: TaskQueues,
    status_writer: RetryingStatusWriter,
    store: Arc<dyn ProcessStore>,
    publisher: StatusEventPublisher,
    credentials: Arc<dyn CredentialClient>,
    config: Arc<GridflowConfig>,
}

impl ProcessLifecycleManager {
    /// Build a manager around a process and its task chain. For a fresh
    /// process the chain's records become the process's task list; for a
    /// recovered one the chain was rebuilt from the persisted records and the
    /// two already agree.
    pub fn new(
        mut process: Process,
        chain: Vec<ChainedTask>,
        client: Arc<dyn ResourceClient>,
        deps: ManagerDeps,
    ) -> Arc<Self> {
        let mut chain = chain;
        chain.sort_by_key(|slot| slot.record.index);

        if process.tasks.is_empty() {
            process.tasks = chain.iter().map(|slot| slot.record.clone()).collect();
        } else {
            process.tasks.sort_by_key(|record| record.index);
        }

        let executables = chain.iter().map(|slot| slot.task.clone()).collect();
        let positions = process
            .tasks
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id, position))
            .collect();

        Arc::new(Self {
            process_id: process.id,
            state: Mutex::new(ManagerState {
                machine: ProcessStateMachine::new(process),
                executables,
                positions,
            }),
            client,
            queues: deps.queues,
            status_writer: deps.status_writer,
            store: deps.store,
            publisher: deps.publisher,
            credentials: deps.credentials,
            config: deps.config,
        })
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub async fn current_state(&self) -> ProcessState {
        self.state.lock().await.machine.current_state()
    }

    /// Clone of the process record, for inspection and tests.
    pub async fn process_snapshot(&self) -> Process {
        self.state.lock().await.machine.process().clone()
    }

    /// Validate the process, take ownership and submit the first task.
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state).await
    }

    /// Resume after an outage from the last known task index, never from the
    /// beginning.
    pub async fn resume(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.machine.current_state() == ProcessState::Created {
            // Never got going before the outage; a plain start is the resume.
            return self.start_locked(&mut state).await;
        }

        let index = state.machine.process().current_task_index;
        if index >= state.executables.len() {
            return self
                .apply_transition(
                    &mut state,
                    ProcessEvent::Complete,
                    "all tasks had completed before the outage",
                )
                .await
                .map(|_| ());
        }

        info!(
            process_id = %self.process_id,
            task_index = index,
            "Resuming process from last known task"
        );
        self.submit_task_at(&mut state, index).await
    }

    /// Sole external trigger for pipeline advancement.
    pub async fn on_task_state_changed(
        &self,
        task_id: TaskId,
        new_state: TaskRunState,
        remote_job: Option<RemoteJobId>,
        reason: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.machine.current_state();
        if current.is_terminal() {
            debug!(
                process_id = %self.process_id,
                %task_id,
                state = %new_state,
                "Terminal process; task event ignored"
            );
            return Ok(());
        }

        let Some(&position) = state.positions.get(&task_id) else {
            warn!(process_id = %self.process_id, %task_id, "Event for unknown task; ignored");
            return Ok(());
        };
        if position < state.machine.process().current_task_index {
            debug!(
                process_id = %self.process_id,
                %task_id,
                position,
                "Stale or duplicate task event; ignored"
            );
            return Ok(());
        }

        let kind = {
            let process = state.machine.process_mut();
            let record = &mut process.tasks[position];
            if let Some(job) = remote_job {
                if record.active_remote_job() != Some(&job) {
                    record.add_remote_job(job);
                }
            }
            record.record_status(new_state, reason);
            record.kind
        };
        let record = state.machine.process().tasks[position].clone();
        self.write_task_update(&record, new_state, reason).await?;

        match new_state {
            TaskRunState::Completed => {
                state.machine.process_mut().current_task_index = position + 1;
                if position + 1 < state.executables.len() {
                    self.submit_task_at(&mut state, position + 1).await?;
                } else {
                    self.apply_transition(
                        &mut state,
                        ProcessEvent::Complete,
                        "all tasks completed",
                    )
                    .await?;
                }
            }
            TaskRunState::Failed => {
                if current == ProcessState::Canceling {
                    // The cancel path closes the process out; a failing task
                    // during teardown changes nothing.
                    debug!(process_id = %self.process_id, %task_id, "Task failed during teardown");
                } else {
                    self.apply_transition(
                        &mut state,
                        ProcessEvent::Fail(reason.to_string()),
                        &format!("{kind} task failed"),
                    )
                    .await?;
                }
            }
            TaskRunState::Canceled => {
                if current == ProcessState::Canceling {
                    self.apply_transition(&mut state, ProcessEvent::CancelConfirmed, reason)
                        .await?;
                }
            }
            TaskRunState::Created | TaskRunState::Executing | TaskRunState::Canceling => {}
        }

        self.checkpoint(&state).await
    }

    /// Convenience wrapper for the event pump.
    pub async fn on_task_status_event(&self, event: &TaskStatusEvent) -> Result<()> {
        self.on_task_state_changed(
            event.task_id,
            event.state,
            event.remote_job.clone(),
            &event.reason,
        )
        .await
    }

    /// Request cancellation: enter Canceling, run best-effort teardown of the
    /// task in flight, confirm. Teardown sub-step failures never block
    /// confirmation.
    pub async fn cancel(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut state = self.state.lock().await;
        if state.machine.current_state().is_terminal() {
            return Ok(());
        }

        self.apply_transition(&mut state, ProcessEvent::Cancel, &reason)
            .await?;

        let len = state.executables.len();
        if len > 0 {
            let index = state.machine.process().current_task_index.min(len - 1);
            // Teardown in reverse: the task in flight first, then earlier
            // tasks that may still own resources (a monitoring cancel must
            // still reach the submission task's instance teardown).
            for position in (0..=index).rev() {
                let task = state.executables[position].clone();
                let record = state.machine.process().tasks[position].clone();
                let ctx = self.context_for(state.machine.process(), record);
                task.cancel(&ctx).await;
            }
            state.machine.process_mut().tasks[index]
                .record_status(TaskRunState::Canceled, "canceled during teardown");
        }

        self.apply_transition(&mut state, ProcessEvent::CancelConfirmed, "teardown finished")
            .await?;
        Ok(())
    }

    /// Run one task from a queue. Transient infrastructure faults are retried
    /// with the configured backoff before escalating to an operator alert;
    /// the process stays in its last known state on escalation.
    pub async fn execute_task(&self, task_id: TaskId) {
        let (task, ctx) = {
            let mut state = self.state.lock().await;
            let current = state.machine.current_state();
            if current.is_terminal() || current == ProcessState::Canceling {
                debug!(process_id = %self.process_id, %task_id, "Process winding down; task skipped");
                return;
            }
            let Some(&position) = state.positions.get(&task_id) else {
                warn!(process_id = %self.process_id, %task_id, "Queued task unknown to its manager");
                return;
            };
            if position < state.machine.process().current_task_index {
                debug!(process_id = %self.process_id, %task_id, "Redelivered task already completed");
                return;
            }

            let task = state.executables[position].clone();
            state.machine.process_mut().tasks[position]
                .record_status(TaskRunState::Executing, "picked up from queue");
            let record = state.machine.process().tasks[position].clone();
            let ctx = self.context_for(state.machine.process(), record);
            (task, ctx)
        };

        if let Err(err) = self
            .write_task_update(&ctx.record, TaskRunState::Executing, "picked up from queue")
            .await
        {
            warn!(process_id = %self.process_id, %task_id, error = %err, "Executing status not recorded");
        }

        let kind = ctx.record.kind;
        let policy = self.config.backoff.to_policy();
        let outcome = retry_with_backoff(
            &policy,
            "task execution",
            GridflowError::is_transient,
            || {
                let task = task.clone();
                let ctx = ctx.clone();
                async move {
                    let mut ctx = ctx;
                    ctx.credential = self.resolve_credential(&ctx.compute).await?;
                    task.run(&ctx).await
                }
            },
        )
        .await;

        match outcome {
            Ok((result, _)) => {
                let state = if result.is_completed() {
                    TaskRunState::Completed
                } else {
                    TaskRunState::Failed
                };
                self.publisher.publish_task_status(TaskStatusEvent {
                    process_id: self.process_id,
                    task_id,
                    task_kind: kind,
                    state,
                    remote_job: result.remote_job,
                    reason: result.message,
                    occurred_at: Utc::now(),
                });
            }
            Err(err) if err.is_transient() => {
                error!(
                    process_id = %self.process_id,
                    %task_id,
                    task_kind = %kind,
                    error = %err,
                    "Task execution exhausted retries; process stays in its last known state"
                );
                self.publisher.publish_alert(
                    "task execution",
                    format!("process {} {kind} task: {err}", self.process_id),
                );
            }
            Err(err) => {
                // Validation and other deterministic faults surface as a
                // failed task.
                self.publisher.publish_task_status(TaskStatusEvent {
                    process_id: self.process_id,
                    task_id,
                    task_kind: kind,
                    state: TaskRunState::Failed,
                    remote_job: None,
                    reason: err.to_string(),
                    occurred_at: Utc::now(),
                });
            }
        }
    }

    /// Validate, start and submit the first task.
    async fn start_locked(&self, state: &mut ManagerState) -> Result<()> {
        if state.machine.process().tasks.is_empty() {
            return Err(GridflowError::validation(format!(
                "process {} has no tasks",
                self.process_id
            )));
        }

        self.apply_transition(
            state,
            ProcessEvent::Validate,
            "inputs and configuration validated",
        )
        .await?;
        self.apply_transition(
            state,
            ProcessEvent::Start,
            "lifecycle manager took ownership",
        )
        .await?;

        let first = state.machine.process().current_task_index;
        self.submit_task_at(state, first).await
    }

    /// Enter the task's phase and enqueue it as one logical step. If the
    /// enqueue fails after the phase was entered, the half-applied step is
    /// escalated as an infrastructure fault visible to operators.
    async fn submit_task_at(&self, state: &mut ManagerState, position: usize) -> Result<()> {
        let record = state
            .machine
            .process()
            .tasks
            .get(position)
            .cloned()
            .ok_or_else(|| GridflowError::Queue(format!("no task at position {position}")))?;
        let kind = record.kind;
        let queue = queue_for(kind);
        let phase = phase_for(kind);

        if state.machine.current_state() != phase {
            self.apply_transition(
                state,
                ProcessEvent::EnterPhase(phase),
                &format!("{kind} task submitted to {queue} queue"),
            )
            .await?;
        }

        match self
            .queues
            .submit(
                queue,
                QueuedTask {
                    process_id: self.process_id,
                    task_id: record.id,
                    kind,
                },
            )
            .await
        {
            Ok(()) => {
                info!(
                    process_id = %self.process_id,
                    task_id = %record.id,
                    task_kind = %kind,
                    queue = %queue,
                    "Task submitted"
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    process_id = %self.process_id,
                    task_id = %record.id,
                    queue = %queue,
                    error = %err,
                    "Phase entered but enqueue failed"
                );
                self.publisher.publish_alert(
                    "task queue submission",
                    format!(
                        "process {} {kind} task: phase {phase} entered but enqueue failed: {err}",
                        self.process_id
                    ),
                );
                Err(GridflowError::Queue(err.to_string()))
            }
        }
    }

    async fn apply_transition(
        &self,
        state: &mut ManagerState,
        event: ProcessEvent,
        reason: &str,
    ) -> Result<ProcessState> {
        let target = state.machine.transition(event, reason)?;
        self.status_writer
            .write_process_status(
                self.process_id,
                ProcessStatusUpdate {
                    state: target,
                    time_of_state_change: Utc::now(),
                    reason: reason.to_string(),
                },
            )
            .await?;
        self.checkpoint(state).await?;
        Ok(target)
    }

    async fn checkpoint(&self, state: &ManagerState) -> Result<()> {
        self.store
            .save(state.machine.process())
            .await
            .map_err(|err| GridflowError::transient("process checkpoint", err))
    }

    async fn write_task_update(
        &self,
        record: &TaskRecord,
        state: TaskRunState,
        reason: &str,
    ) -> Result<()> {
        self.status_writer
            .write_task_status(
                record.id,
                TaskStatusUpdate {
                    state,
                    time_of_state_change: Utc::now(),
                    reason: reason.to_string(),
                    remote_job_ids: record.remote_jobs.clone(),
                },
            )
            .await
    }

    /// Per-invocation context. Credentials are resolved at execution time,
    /// never here.
    fn context_for(&self, process: &Process, record: TaskRecord) -> TaskContext {
        let remote_job = process
            .tasks
            .iter()
            .flat_map(|task| task.remote_jobs.iter())
            .last()
            .cloned();
        TaskContext {
            process_id: self.process_id,
            record,
            compute: process.compute.clone(),
            client: self.client.clone(),
            credential: None,
            remote_job,
            config: self.config.clone(),
        }
    }

    async fn resolve_credential(
        &self,
        compute: &ComputeDescriptor,
    ) -> Result<Option<crate::clients::PasswordCredential>> {
        if compute.backend == BackendKind::Local {
            return Ok(None);
        }
        match self
            .credentials
            .password_credential(&compute.credential_token, &compute.owner)
            .await
        {
            Ok(credential) => Ok(Some(credential)),
            Err(CredentialError::Unreachable(message)) => {
                Err(GridflowError::transient("credential lookup", message))
            }
            Err(err @ CredentialError::NotFound { .. }) => {
                Err(GridflowError::validation(err.to_string()))
            }
        }
    }
}

/// All live managers on this worker, keyed by process id. The event pump
/// dispatches task status events to the owning manager.
pub struct ManagerRegistry {
    managers: DashMap<ProcessId, Arc<ProcessLifecycleManager>>,
    publisher: StatusEventPublisher,
}

impl ManagerRegistry {
    pub fn new(publisher: StatusEventPublisher) -> Arc<Self> {
        Arc::new(Self {
            managers: DashMap::new(),
            publisher,
        })
    }

    pub fn register(&self, manager: Arc<ProcessLifecycleManager>) {
        self.managers.insert(manager.process_id(), manager);
    }

    pub fn get(&self, process_id: ProcessId) -> Option<Arc<ProcessLifecycleManager>> {
        self.managers.get(&process_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, process_id: ProcessId) {
        self.managers.remove(&process_id);
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Consume the status channel and dispatch task events to their owning
    /// managers. Runs until the channel closes.
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut receiver = self.publisher.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(GridflowEvent::TaskStatus(event)) => {
                        let Some(manager) = registry.get(event.process_id) else {
                            debug!(process_id = %event.process_id, "Task event for unmanaged process");
                            continue;
                        };
                        // Dispatch off the pump loop: one process's slow
                        // handler must not stall event delivery to the rest.
                        // The manager's own mutex serializes per process, and
                        // the stale-event guards absorb any reordering.
                        tokio::spawn(async move {
                            if let Err(err) = manager.on_task_status_event(&event).await {
                                error!(
                                    process_id = %event.process_id,
                                    task_id = %event.task_id,
                                    error = %err,
                                    "Task event handling failed"
                                );
                            }
                        });
                    }
                    Ok(GridflowEvent::OperatorAlert { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event pump lagged; task events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// One worker loop per typed queue, so staging backlog cannot starve job
/// submission.
pub fn spawn_queue_workers(
    registry: Arc<ManagerRegistry>,
    receivers: TaskQueueReceivers,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_inner()
        .into_iter()
        .map(|(queue, mut receiver)| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                while let Some(queued) = receiver.recv().await {
                    let Some(manager) = registry.get(queued.process_id) else {
                        warn!(
                            process_id = %queued.process_id,
                            %queue,
                            "Queued task for unmanaged process; dropped"
                        );
                        continue;
                    };
                    manager.execute_task(queued.task_id).await;
                }
                debug!(%queue, "Queue worker stopped");
            })
        })
        .collect()
}
