//! Shared fixtures: an in-memory collaborator set, a local-backend process
//! builder and a running harness with queue workers and the event pump.

#![allow(dead_code)]

use gridflow_core::backends::{LocalClient, ResourceClient};
use gridflow_core::clients::{
    InMemoryCredentialClient, InMemoryProcessStore, InMemoryStatusClient, RetryingStatusWriter,
};
use gridflow_core::config::{BackoffConfig, GridflowConfig, MonitoringConfig};
use gridflow_core::coordination::InMemoryCoordination;
use gridflow_core::events::StatusEventPublisher;
use gridflow_core::models::{BackendKind, ComputeDescriptor, Process};
use gridflow_core::orchestration::{
    spawn_queue_workers, ManagerBuilder, ManagerDeps, ManagerRegistry, ProcessLifecycleManager,
    TaskQueueReceivers, TaskQueues,
};
use gridflow_core::state_machine::ProcessState;
use gridflow_core::tasks::TaskFactory;
use gridflow_core::{GridflowError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Test-speed configuration: millisecond backoff, fast monitoring polls.
pub fn fast_config() -> GridflowConfig {
    let mut config = GridflowConfig::default();
    config.backoff = BackoffConfig {
        initial_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 5,
        max_attempts: 3,
    };
    config.monitoring = MonitoringConfig {
        poll_interval_ms: 10,
        terminal_deadline_ms: 10_000,
    };
    config
}

/// The full in-memory collaborator set plus the queue receivers, so tests can
/// choose between running workers and inspecting queues directly.
pub struct Harness {
    pub deps: ManagerDeps,
    pub publisher: StatusEventPublisher,
    pub status: Arc<InMemoryStatusClient>,
    pub store: Arc<InMemoryProcessStore>,
    pub coordination: Arc<InMemoryCoordination>,
    pub credentials: Arc<InMemoryCredentialClient>,
    pub registry: Arc<ManagerRegistry>,
    pub receivers: Option<TaskQueueReceivers>,
}

impl Harness {
    pub fn new(config: GridflowConfig) -> Self {
        let publisher = StatusEventPublisher::new(256);
        let status = Arc::new(InMemoryStatusClient::new());
        let store = Arc::new(InMemoryProcessStore::new());
        let coordination = Arc::new(InMemoryCoordination::new());
        let credentials = Arc::new(InMemoryCredentialClient::new());
        let config = Arc::new(config);
        let (queues, receivers) = TaskQueues::bounded(config.queues.capacity);

        let status_writer = RetryingStatusWriter::new(
            status.clone(),
            status.clone(),
            config.backoff.to_policy(),
            publisher.clone(),
        );
        let deps = ManagerDeps {
            queues,
            status_writer,
            store: store.clone(),
            publisher: publisher.clone(),
            credentials: credentials.clone(),
            config,
        };
        let registry = ManagerRegistry::new(publisher.clone());

        Self {
            deps,
            publisher,
            status,
            store,
            coordination,
            credentials,
            registry,
            receivers: Some(receivers),
        }
    }

    /// Start the queue workers and the event pump. After this, submitted
    /// tasks execute for real.
    pub fn start(&mut self) {
        let receivers = self
            .receivers
            .take()
            .expect("harness already started");
        spawn_queue_workers(self.registry.clone(), receivers);
        self.registry.spawn_event_pump();
    }

    pub fn local_client(&self) -> Arc<dyn ResourceClient> {
        Arc::new(LocalClient::new(self.deps.config.execution.clone()))
    }

    /// Build and register a local-backend manager with the standard chain.
    pub fn local_manager(
        &self,
        working_dir: &Path,
        parameters: HashMap<String, Value>,
    ) -> Arc<ProcessLifecycleManager> {
        let process = local_process(working_dir);
        let factory =
            TaskFactory::local_hpc(BackendKind::Local, self.publisher.clone()).unwrap();
        let chain = factory.task_chain(process.id, &parameters);
        let manager =
            ProcessLifecycleManager::new(process, chain, self.local_client(), self.deps.clone());
        self.registry.register(manager.clone());
        manager
    }
}

/// A process descriptor pointing all directories at one existing tempdir.
pub fn local_process(working_dir: &Path) -> Process {
    Process::new(
        "exp-test",
        ComputeDescriptor {
            backend: BackendKind::Local,
            host: "localhost".to_string(),
            working_dir: working_dir.to_path_buf(),
            input_dir: working_dir.to_path_buf(),
            output_dir: working_dir.to_path_buf(),
            credential_token: "token".to_string(),
            owner: "alice".to_string(),
        },
    )
}

pub fn command_parameters(command: &str) -> HashMap<String, Value> {
    let mut parameters = HashMap::new();
    parameters.insert("command".to_string(), json!(command));
    parameters
}

/// Poll until the manager reaches the given state or the deadline passes.
pub async fn wait_for_state(
    manager: &ProcessLifecycleManager,
    expected: ProcessState,
    deadline: Duration,
) -> std::result::Result<(), ProcessState> {
    let start = std::time::Instant::now();
    loop {
        let state = manager.current_state().await;
        if state == expected {
            return Ok(());
        }
        if start.elapsed() > deadline {
            return Err(state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Manager builder used by the recovery tests: local backend only.
pub struct LocalManagerBuilder {
    pub deps: ManagerDeps,
}

#[async_trait::async_trait]
impl ManagerBuilder for LocalManagerBuilder {
    async fn build(&self, process: Process) -> Result<Arc<ProcessLifecycleManager>> {
        if process.compute.backend != BackendKind::Local {
            return Err(GridflowError::Configuration(format!(
                "builder only handles local processes, got {}",
                process.compute.backend
            )));
        }
        let factory = TaskFactory::local_hpc(process.compute.backend, self.deps.publisher.clone())?;
        let chain = factory.rebuild_chain(process.id, &process.tasks);
        let client: Arc<dyn ResourceClient> =
            Arc::new(LocalClient::new(self.deps.config.execution.clone()));
        Ok(ProcessLifecycleManager::new(
            process,
            chain,
            client,
            self.deps.clone(),
        ))
    }
}
