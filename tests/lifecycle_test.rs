//! End-to-end lifecycle behavior on the local backend: pipeline advancement,
//! failure semantics, duplicate/stale event handling and cancellation.

mod common;

use common::{command_parameters, fast_config, local_process, wait_for_state, Harness};
use gridflow_core::clients::{InMemoryStatusClient, RetryingStatusWriter};
use gridflow_core::events::{GridflowEvent, TaskStatusEvent};
use gridflow_core::models::{BackendKind, TaskId};
use gridflow_core::orchestration::ProcessLifecycleManager;
use gridflow_core::resilience::BackoffPolicy;
use gridflow_core::state_machine::{ProcessState, TaskRunState};
use gridflow_core::tasks::TaskFactory;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn local_pipeline_runs_to_completion() {
    let mut harness = Harness::new(fast_config());
    harness.start();
    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("true"));

    manager.init().await.unwrap();
    wait_for_state(&manager, ProcessState::Completed, Duration::from_secs(15))
        .await
        .unwrap_or_else(|state| panic!("stuck in {state}"));

    let process = manager.process_snapshot().await;
    assert_eq!(process.current_task_index, process.tasks.len());
    for task in &process.tasks {
        assert_eq!(task.current_state(), TaskRunState::Completed, "{}", task.kind);
    }

    // The nominal phases were walked and reported to the status store
    let states: Vec<ProcessState> = process
        .status_history
        .iter()
        .map(|record| record.state)
        .collect();
    assert!(states.contains(&ProcessState::Executing));
    assert!(states.contains(&ProcessState::Monitoring));
    assert_eq!(states.last(), Some(&ProcessState::Completed));
    assert!(!harness.status.process_history(process.id).is_empty());
}

#[tokio::test]
async fn failed_job_halts_the_pipeline() {
    let mut harness = Harness::new(fast_config());
    harness.start();
    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("exit 3"));

    manager.init().await.unwrap();
    wait_for_state(&manager, ProcessState::Failed, Duration::from_secs(15))
        .await
        .unwrap_or_else(|state| panic!("stuck in {state}"));

    let process = manager.process_snapshot().await;
    assert!(!process.errors.is_empty());
    // The monitoring task observed the failure; nothing after it ever ran
    for task in &process.tasks[4..] {
        assert!(
            task.status_history.is_empty(),
            "{} ran after the failure",
            task.kind
        );
    }
}

#[tokio::test]
async fn duplicate_completed_event_is_a_no_op() {
    let harness = Harness::new(fast_config());
    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("true"));

    manager.init().await.unwrap();
    let first_task = manager.process_snapshot().await.tasks[0].clone();

    manager
        .on_task_state_changed(first_task.id, TaskRunState::Completed, None, "done")
        .await
        .unwrap();
    let after_first = manager.process_snapshot().await;
    assert_eq!(after_first.current_task_index, 1);

    // Redelivery of the same completion changes nothing
    manager
        .on_task_state_changed(first_task.id, TaskRunState::Completed, None, "done again")
        .await
        .unwrap();
    let after_duplicate = manager.process_snapshot().await;
    assert_eq!(after_duplicate.current_task_index, 1);
    assert_eq!(
        after_duplicate.tasks[0].status_history.len(),
        after_first.tasks[0].status_history.len()
    );
    assert_eq!(after_duplicate.state, after_first.state);
}

#[tokio::test]
async fn failed_is_sticky_under_late_events() {
    let harness = Harness::new(fast_config());
    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("true"));

    manager.init().await.unwrap();
    let first_task = manager.process_snapshot().await.tasks[0].clone();

    manager
        .on_task_state_changed(first_task.id, TaskRunState::Failed, None, "boom")
        .await
        .unwrap();
    assert_eq!(manager.current_state().await, ProcessState::Failed);

    // A late completion for the same task must not resurrect the process
    manager
        .on_task_state_changed(first_task.id, TaskRunState::Completed, None, "late")
        .await
        .unwrap();
    let process = manager.process_snapshot().await;
    assert_eq!(process.state, ProcessState::Failed);
    assert_eq!(process.current_task_index, 0);
}

#[tokio::test]
async fn events_for_unknown_tasks_are_ignored() {
    let harness = Harness::new(fast_config());
    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("true"));

    manager.init().await.unwrap();
    let before = manager.process_snapshot().await;

    manager
        .on_task_state_changed(TaskId::new(), TaskRunState::Completed, None, "stray")
        .await
        .unwrap();

    let after = manager.process_snapshot().await;
    assert_eq!(after.current_task_index, before.current_task_index);
    assert_eq!(after.state, before.state);
}

#[tokio::test]
async fn enqueue_failure_surfaces_an_operator_alert() {
    let mut harness = Harness::new(fast_config());
    // Close the queues: phase entry will succeed, the enqueue will not
    drop(harness.receivers.take());
    let mut alerts = harness.publisher.subscribe();

    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("true"));
    let err = manager.init().await.unwrap_err();
    assert!(matches!(err, gridflow_core::GridflowError::Queue(_)));

    loop {
        match alerts.recv().await.unwrap() {
            GridflowEvent::OperatorAlert { operation, .. }
                if operation == "task queue submission" =>
            {
                break;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn slow_status_store_on_one_process_does_not_stall_others() {
    let harness = Harness::new(fast_config());
    harness.registry.spawn_event_pump();

    // Process A reports status through its own store, with a retry window
    // long enough to pin A's handler when the store goes down
    let failing = Arc::new(InMemoryStatusClient::new());
    let slow_policy = BackoffPolicy {
        initial_delay: Duration::from_millis(500),
        multiplier: 2.0,
        max_delay: Duration::from_secs(2),
        max_attempts: 6,
    };
    let mut deps_a = harness.deps.clone();
    deps_a.status_writer = RetryingStatusWriter::new(
        failing.clone(),
        failing.clone(),
        slow_policy,
        harness.publisher.clone(),
    );

    let dir = tempfile::tempdir().unwrap();
    let process_a = local_process(dir.path());
    let factory =
        TaskFactory::local_hpc(BackendKind::Local, harness.publisher.clone()).unwrap();
    let chain_a = factory.task_chain(process_a.id, &command_parameters("true"));
    let manager_a =
        ProcessLifecycleManager::new(process_a, chain_a, harness.local_client(), deps_a);
    harness.registry.register(manager_a.clone());

    let manager_b = harness.local_manager(dir.path(), command_parameters("true"));

    manager_a.init().await.unwrap();
    manager_b.init().await.unwrap();
    let task_a = manager_a.process_snapshot().await.tasks[0].clone();
    let task_b = manager_b.process_snapshot().await.tasks[0].clone();

    // A's store goes down; its completion handler will now sit in retries
    // for several seconds while holding A's lock
    failing.fail_next(100);
    let started = Instant::now();
    for (manager, task) in [(&manager_a, &task_a), (&manager_b, &task_b)] {
        harness.publisher.publish_task_status(TaskStatusEvent {
            process_id: manager.process_id(),
            task_id: task.id,
            task_kind: task.kind,
            state: TaskRunState::Completed,
            remote_job: None,
            reason: "done".to_string(),
            occurred_at: chrono::Utc::now(),
        });
    }

    // B's completion must be delivered while A is still mid-retry
    loop {
        if manager_b.process_snapshot().await.current_task_index == 1 {
            break;
        }
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "completion for an unrelated process was held up"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn cancel_mid_pipeline_tears_down_and_confirms() {
    let mut harness = Harness::new(fast_config());
    harness.start();
    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("sleep 30"));

    manager.init().await.unwrap();
    wait_for_state(&manager, ProcessState::Monitoring, Duration::from_secs(15))
        .await
        .unwrap_or_else(|state| panic!("stuck in {state}"));

    manager.cancel("user requested cancellation").await.unwrap();
    assert_eq!(manager.current_state().await, ProcessState::Canceled);

    let process = manager.process_snapshot().await;
    let states: Vec<ProcessState> = process
        .status_history
        .iter()
        .map(|record| record.state)
        .collect();
    assert!(states.contains(&ProcessState::Canceling));
    assert_eq!(states.last(), Some(&ProcessState::Canceled));

    // Late events from the torn-down job are ignored
    let monitoring = process.tasks[3].clone();
    manager
        .on_task_state_changed(monitoring.id, TaskRunState::Failed, None, "job killed")
        .await
        .unwrap();
    assert_eq!(manager.current_state().await, ProcessState::Canceled);
}
