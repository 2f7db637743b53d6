//! Cloud job task: provisions a compute instance, runs the payload on it and
//! owns the full resource-teardown sequence on cancellation.

use super::{backend_outcome, Task, TaskContext, TaskResult};
use crate::backends::{CloudClient, CloudResources, InstanceSpec, JobSpec, ResourceClient};
use crate::clients::CredentialClient;
use crate::error::Result;
use crate::models::TaskKind;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CloudJobTask {
    client: Arc<CloudClient>,
    resources: CloudResources,
    credentials: Arc<dyn CredentialClient>,
}

impl CloudJobTask {
    pub fn new(
        client: Arc<CloudClient>,
        resources: CloudResources,
        credentials: Arc<dyn CredentialClient>,
    ) -> Self {
        Self {
            client,
            resources,
            credentials,
        }
    }
}

#[async_trait]
impl Task for CloudJobTask {
    fn kind(&self) -> TaskKind {
        TaskKind::JobSubmission
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let command = ctx.required_param("command")?;
        let image_id = ctx.required_param("image_id")?;
        let instance_type = ctx
            .optional_param("instance_type")
            .unwrap_or_else(|| "m5.large".to_string());

        let spec = InstanceSpec {
            image_id,
            instance_type,
            key_name: self.resources.key_name.clone(),
            security_group: self.resources.security_group.clone(),
        };

        let instance_id = match self.client.provision_and_activate(&spec).await {
            Ok(id) => id,
            Err(err) => return backend_outcome("instance provisioning", err),
        };

        let job_spec = JobSpec::new(
            format!("gridflow-{}", ctx.process_id),
            command,
            ctx.compute.working_dir.clone(),
        );
        match self.client.submit_job(&job_spec).await {
            Ok(job_id) => {
                info!(
                    process_id = %ctx.process_id,
                    instance_id = %instance_id,
                    "Cloud job dispatched"
                );
                Ok(
                    TaskResult::completed(format!("job running on instance {instance_id}"))
                        .with_remote_job(job_id),
                )
            }
            Err(err) => backend_outcome("cloud job dispatch", err),
        }
    }

    /// Teardown order: (1) terminate the instance and wait for the backend
    /// to confirm, (2) delete the security group, (3) delete the keypair,
    /// (4) revoke the derived credential. Steps run independently; an
    /// earlier failure never blocks a later step, and nothing is re-thrown.
    async fn cancel(&self, ctx: &TaskContext) {
        let instance_id = ctx
            .record
            .active_remote_job()
            .map(|job| job.as_str().to_string())
            .or_else(|| self.client.active_instance());

        if let Some(instance_id) = instance_id {
            if let Err(err) = self.client.terminate_and_confirm(&instance_id).await {
                warn!(
                    process_id = %ctx.process_id,
                    instance_id = %instance_id,
                    error = %err,
                    "Instance termination did not confirm during teardown"
                );
            }
        } else {
            warn!(process_id = %ctx.process_id, "No instance recorded; skipping termination");
        }

        if let Err(err) = self
            .client
            .api()
            .delete_security_group(&self.resources.security_group)
            .await
        {
            warn!(
                process_id = %ctx.process_id,
                security_group = %self.resources.security_group,
                error = %err,
                "Security group deletion failed during teardown"
            );
        }

        if let Err(err) = self
            .client
            .api()
            .delete_keypair(&self.resources.key_name)
            .await
        {
            warn!(
                process_id = %ctx.process_id,
                keypair = %self.resources.key_name,
                error = %err,
                "Keypair deletion failed during teardown"
            );
        }

        if let Err(err) = self
            .credentials
            .revoke_derived(&self.resources.derived_credential_token)
            .await
        {
            warn!(
                process_id = %ctx.process_id,
                error = %err,
                "Derived credential revocation failed during teardown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cloud::testing::FakeCloudApi;
    use crate::clients::InMemoryCredentialClient;
    use crate::config::{CloudConfig, ExecutionConfig, GridflowConfig};
    use crate::models::{BackendKind, ComputeDescriptor, ProcessId, TaskRecord};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;

    fn fast_cloud_config() -> CloudConfig {
        CloudConfig {
            provision_poll_interval_ms: 1,
            provision_deadline_ms: 1_000,
            terminate_deadline_ms: 1_000,
        }
    }

    fn setup() -> (Arc<FakeCloudApi>, Arc<CloudClient>, Arc<InMemoryCredentialClient>, CloudJobTask) {
        let api = Arc::new(FakeCloudApi::new());
        let client = Arc::new(CloudClient::new(
            api.clone(),
            fast_cloud_config(),
            ExecutionConfig::default(),
        ));
        let credentials = Arc::new(InMemoryCredentialClient::new());
        let task = CloudJobTask::new(
            client.clone(),
            CloudResources {
                security_group: "exp-sg".to_string(),
                key_name: "exp-key".to_string(),
                derived_credential_token: "derived-token".to_string(),
            },
            credentials.clone(),
        );
        (api, client, credentials, task)
    }

    fn context(kind: TaskKind, client: Arc<CloudClient>) -> TaskContext {
        let process_id = ProcessId::new();
        TaskContext {
            process_id,
            record: TaskRecord::new(kind, process_id, 2),
            compute: ComputeDescriptor {
                backend: BackendKind::Cloud,
                host: "api.cloud.example".to_string(),
                working_dir: PathBuf::from("/work"),
                input_dir: PathBuf::from("/in"),
                output_dir: PathBuf::from("/out"),
                credential_token: "token".to_string(),
                owner: "alice".to_string(),
            },
            client,
            credential: None,
            remote_job: None,
            config: Arc::new(GridflowConfig::default()),
        }
    }

    #[tokio::test]
    async fn run_provisions_then_dispatches() {
        let (api, client, _credentials, task) = setup();
        let mut ctx = context(TaskKind::JobSubmission, client);
        ctx.record.parameters.insert("command".to_string(), json!("./sim"));
        ctx.record.parameters.insert("image_id".to_string(), json!("ami-42"));

        let result = task.run(&ctx).await.unwrap();
        assert!(result.is_completed());
        assert!(result.remote_job.is_some());
        assert_eq!(api.commands.lock().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_steps_are_independent() {
        let (api, client, credentials, task) = setup();
        let mut ctx = context(TaskKind::JobSubmission, client.clone());
        ctx.record.parameters.insert("command".to_string(), json!("./sim"));
        ctx.record.parameters.insert("image_id".to_string(), json!("ami-42"));

        let result = task.run(&ctx).await.unwrap();
        ctx.record.add_remote_job(result.remote_job.unwrap());

        // Security group deletion throws; keypair deletion and credential
        // revocation must still run
        api.fail_security_group_delete.store(true, Ordering::SeqCst);
        task.cancel(&ctx).await;

        assert!(api.deleted_security_groups.lock().is_empty());
        assert_eq!(api.deleted_keypairs.lock().as_slice(), ["exp-key"]);
        assert!(credentials.is_revoked("derived-token"));

        // Instance was still terminated first
        let instance_id = ctx.record.active_remote_job().unwrap().clone();
        assert_eq!(
            client.query_job_state(&instance_id).await.unwrap(),
            crate::models::RemoteJobState::Complete
        );
    }

    #[tokio::test]
    async fn missing_image_id_is_a_validation_error() {
        let (_api, client, _credentials, task) = setup();
        let mut ctx = context(TaskKind::JobSubmission, client);
        ctx.record.parameters.insert("command".to_string(), json!("./sim"));

        let err = task.run(&ctx).await.unwrap_err();
        assert!(matches!(err, crate::error::GridflowError::Validation { .. }));
    }
}
