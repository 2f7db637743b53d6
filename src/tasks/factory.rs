//! Backend-keyed task construction.
//!
//! One factory instance serves one backend family. Selection is a plain
//! match on [`BackendKind`] rather than a trait hierarchy: every creator
//! returns the task appropriate for that backend, substituting [`NoOpTask`]
//! for slots that are vacuous there, so every process carries the same
//! chain shape regardless of where it runs.

use super::{
    ArchiveTask, ChainedTask, CloudJobTask, CompletingTask, EnvCleanupTask, EnvSetupTask,
    InputStagingTask, JobSubmissionTask, MonitoringTask, NoOpTask, OutputStagingTask,
    ParsingTriggerTask, Task,
};
use crate::backends::{CloudClient, CloudResources};
use crate::clients::CredentialClient;
use crate::error::{GridflowError, Result};
use crate::events::StatusEventPublisher;
use crate::models::{BackendKind, ProcessId, TaskKind, TaskRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything the cloud job task needs beyond the shared context.
struct CloudWiring {
    client: Arc<CloudClient>,
    resources: CloudResources,
    credentials: Arc<dyn CredentialClient>,
}

pub struct TaskFactory {
    backend: BackendKind,
    cloud: Option<CloudWiring>,
    publisher: StatusEventPublisher,
}

impl TaskFactory {
    /// Factory for the local and HPC backend families.
    pub fn local_hpc(backend: BackendKind, publisher: StatusEventPublisher) -> Result<Self> {
        if backend == BackendKind::Cloud {
            return Err(GridflowError::Configuration(
                "cloud backends need the cloud factory constructor".to_string(),
            ));
        }
        Ok(Self {
            backend,
            cloud: None,
            publisher,
        })
    }

    /// Factory for the cloud backend family. The instance lifecycle lives in
    /// the job task, so the factory carries the client and resource handles
    /// the teardown path will need.
    pub fn cloud(
        client: Arc<CloudClient>,
        resources: CloudResources,
        credentials: Arc<dyn CredentialClient>,
        publisher: StatusEventPublisher,
    ) -> Self {
        Self {
            backend: BackendKind::Cloud,
            cloud: Some(CloudWiring {
                client,
                resources,
                credentials,
            }),
            publisher,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn create_env_setup_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        match self.backend {
            BackendKind::Hpc => Arc::new(EnvSetupTask),
            BackendKind::Local => Arc::new(NoOpTask::new(
                TaskKind::EnvSetup,
                "workspace setup not needed on the local backend",
            )),
            // The job task provisions its own instance.
            BackendKind::Cloud => Arc::new(NoOpTask::new(
                TaskKind::EnvSetup,
                "workspace setup handled at instance provisioning",
            )),
        }
    }

    pub fn create_input_data_staging_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        match self.backend {
            BackendKind::Local => Arc::new(NoOpTask::new(
                TaskKind::InputStaging,
                "inputs already local",
            )),
            BackendKind::Hpc | BackendKind::Cloud => Arc::new(InputStagingTask),
        }
    }

    pub fn create_job_submission_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        match (&self.backend, &self.cloud) {
            (BackendKind::Cloud, Some(wiring)) => Arc::new(CloudJobTask::new(
                wiring.client.clone(),
                wiring.resources.clone(),
                wiring.credentials.clone(),
            )),
            _ => Arc::new(JobSubmissionTask),
        }
    }

    pub fn create_job_verification_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        Arc::new(MonitoringTask)
    }

    pub fn create_output_data_staging_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        match self.backend {
            BackendKind::Local => Arc::new(NoOpTask::new(
                TaskKind::OutputStaging,
                "outputs already local",
            )),
            BackendKind::Hpc | BackendKind::Cloud => Arc::new(OutputStagingTask),
        }
    }

    pub fn create_archive_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        Arc::new(ArchiveTask)
    }

    pub fn create_env_cleanup_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        match self.backend {
            BackendKind::Hpc => Arc::new(EnvCleanupTask),
            BackendKind::Local => Arc::new(NoOpTask::new(
                TaskKind::EnvCleanup,
                "no remote workspace to remove on the local backend",
            )),
            // Instance teardown already removes the workspace.
            BackendKind::Cloud => Arc::new(NoOpTask::new(
                TaskKind::EnvCleanup,
                "workspace removed with the instance",
            )),
        }
    }

    pub fn create_completing_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        Arc::new(CompletingTask)
    }

    pub fn create_parsing_triggering_task(&self, _process_id: ProcessId) -> Arc<dyn Task> {
        Arc::new(ParsingTriggerTask::new(self.publisher.clone()))
    }

    /// Constructor dispatch by task kind. Used when rebuilding a persisted
    /// chain whose records already fix the kinds.
    pub fn task_for_kind(&self, kind: TaskKind, process_id: ProcessId) -> Arc<dyn Task> {
        match kind {
            TaskKind::EnvSetup => self.create_env_setup_task(process_id),
            TaskKind::InputStaging => self.create_input_data_staging_task(process_id),
            TaskKind::JobSubmission => self.create_job_submission_task(process_id),
            TaskKind::Monitoring => self.create_job_verification_task(process_id),
            TaskKind::OutputStaging => self.create_output_data_staging_task(process_id),
            TaskKind::Archive => self.create_archive_task(process_id),
            TaskKind::EnvCleanup => self.create_env_cleanup_task(process_id),
            TaskKind::Completing => self.create_completing_task(process_id),
            TaskKind::ParsingTrigger => self.create_parsing_triggering_task(process_id),
        }
    }

    /// Builds the uniform seven-slot chain every process runs, in order.
    /// Each record carries the full parameter map; tasks read only the keys
    /// they declare.
    pub fn task_chain(
        &self,
        process_id: ProcessId,
        parameters: &HashMap<String, Value>,
    ) -> Vec<ChainedTask> {
        const CHAIN: [TaskKind; 7] = [
            TaskKind::EnvSetup,
            TaskKind::InputStaging,
            TaskKind::JobSubmission,
            TaskKind::Monitoring,
            TaskKind::OutputStaging,
            TaskKind::EnvCleanup,
            TaskKind::Completing,
        ];

        CHAIN
            .iter()
            .enumerate()
            .map(|(index, &kind)| {
                let mut record = TaskRecord::new(kind, process_id, index);
                record.parameters = parameters.clone();
                ChainedTask {
                    record,
                    task: self.task_for_kind(kind, process_id),
                }
            })
            .collect()
    }

    /// Rebuilds the executable side of an existing chain from its persisted
    /// records, preserving indices and parameters.
    pub fn rebuild_chain(&self, process_id: ProcessId, records: &[TaskRecord]) -> Vec<ChainedTask> {
        records
            .iter()
            .map(|record| ChainedTask {
                record: record.clone(),
                task: self.task_for_kind(record.kind, process_id),
            })
            .collect()
    }
}
