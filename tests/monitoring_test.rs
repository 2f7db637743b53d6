//! Monitoring deadline semantics: expiry is a transient infrastructure
//! condition, retried with backoff and then escalated, never an immediate
//! process failure.

mod common;

use common::{command_parameters, fast_config, wait_for_state, Harness};
use gridflow_core::config::MonitoringConfig;
use gridflow_core::events::GridflowEvent;
use gridflow_core::state_machine::ProcessState;
use std::time::Duration;

#[tokio::test]
async fn monitoring_timeout_retries_then_escalates_without_failing_the_process() {
    let mut config = fast_config();
    // Deadline far shorter than the job: every monitoring attempt expires
    config.monitoring = MonitoringConfig {
        poll_interval_ms: 5,
        terminal_deadline_ms: 30,
    };
    let mut harness = Harness::new(config);
    harness.start();
    let mut events = harness.publisher.subscribe();

    let dir = tempfile::tempdir().unwrap();
    let manager = harness.local_manager(dir.path(), command_parameters("sleep 30"));
    manager.init().await.unwrap();

    wait_for_state(&manager, ProcessState::Monitoring, Duration::from_secs(15))
        .await
        .unwrap_or_else(|state| panic!("stuck in {state}"));

    // The configured policy retries the expired deadline before escalating;
    // exhaustion surfaces as an operator alert, not a process failure
    let alert = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if let GridflowEvent::OperatorAlert { operation, message, .. } =
                events.recv().await.unwrap()
            {
                if operation == "task execution" {
                    return message;
                }
            }
        }
    })
    .await
    .expect("no escalation alert");
    assert!(alert.contains("monitoring"));

    let state = manager.current_state().await;
    assert_eq!(state, ProcessState::Monitoring, "process must stay in its last known state");
    assert!(manager.process_snapshot().await.errors.is_empty());
}
