//! Cloud IaaS backend: instance lifecycle and command execution through a
//! REST-API collaborator behind the [`CloudApi`] seam.
//!
//! Instance state is eventually consistent, so provisioning and termination
//! poll with exponential backoff under a deadline instead of trusting the
//! first response.

use super::{BackendError, CommandOutput, JobSpec, ResourceClient};
use crate::clients::PasswordCredential;
use crate::config::{CloudConfig, ExecutionConfig};
use crate::models::{RemoteJobId, RemoteJobState};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What to provision for a process's compute instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group: String,
}

/// Instance states reported by the cloud API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Unknown,
}

/// Per-process cloud resources owned by the job task and torn down during
/// cancellation cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudResources {
    pub security_group: String,
    pub key_name: String,
    /// Short-lived credential derived for this execution; revoked on cancel.
    pub derived_credential_token: String,
}

/// REST collaborator for the cloud provider.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn provision_instance(&self, spec: &InstanceSpec) -> Result<String, BackendError>;
    async fn terminate_instance(&self, instance_id: &str) -> Result<(), BackendError>;
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceState, BackendError>;
    async fn delete_security_group(&self, group: &str) -> Result<(), BackendError>;
    async fn delete_keypair(&self, name: &str) -> Result<(), BackendError>;
    async fn run_command(
        &self,
        instance_id: &str,
        command: &str,
    ) -> Result<CommandOutput, BackendError>;
    async fn upload_file(
        &self,
        instance_id: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<(), BackendError>;
    async fn download_file(
        &self,
        instance_id: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<(), BackendError>;
}

pub struct CloudClient {
    api: Arc<dyn CloudApi>,
    cloud_config: CloudConfig,
    execution_config: ExecutionConfig,
    /// Instance this client's process currently executes on.
    active_instance: RwLock<Option<String>>,
}

impl CloudClient {
    pub fn new(
        api: Arc<dyn CloudApi>,
        cloud_config: CloudConfig,
        execution_config: ExecutionConfig,
    ) -> Self {
        Self {
            api,
            cloud_config,
            execution_config,
            active_instance: RwLock::new(None),
        }
    }

    pub fn api(&self) -> &Arc<dyn CloudApi> {
        &self.api
    }

    pub fn active_instance(&self) -> Option<String> {
        self.active_instance.read().clone()
    }

    fn require_instance(&self) -> Result<String, BackendError> {
        self.active_instance.read().clone().ok_or_else(|| {
            BackendError::Connection("no provisioned instance for this process".to_string())
        })
    }

    /// Provision an instance and poll until the API reports it Running, with
    /// exponential backoff under the configured deadline.
    pub async fn provision_and_activate(
        &self,
        spec: &InstanceSpec,
    ) -> Result<String, BackendError> {
        let instance_id = self.api.provision_instance(spec).await?;
        info!(instance_id = %instance_id, image = %spec.image_id, "Provisioned cloud instance");

        self.poll_until(
            &instance_id,
            InstanceState::Running,
            self.cloud_config.provision_deadline(),
        )
        .await?;
        *self.active_instance.write() = Some(instance_id.clone());
        Ok(instance_id)
    }

    /// Terminate an instance and poll until the API confirms termination or
    /// the deadline elapses.
    pub async fn terminate_and_confirm(&self, instance_id: &str) -> Result<(), BackendError> {
        self.api.terminate_instance(instance_id).await?;
        self.poll_until(
            instance_id,
            InstanceState::Terminated,
            self.cloud_config.terminate_deadline(),
        )
        .await?;
        let mut active = self.active_instance.write();
        if active.as_deref() == Some(instance_id) {
            *active = None;
        }
        Ok(())
    }

    async fn poll_until(
        &self,
        instance_id: &str,
        target: InstanceState,
        deadline: Duration,
    ) -> Result<(), BackendError> {
        let started = Instant::now();
        let mut delay = self.cloud_config.provision_poll_interval();

        loop {
            let state = self.api.describe_instance(instance_id).await?;
            debug!(instance_id, state = ?state, "Polled instance state");
            if state == target {
                return Ok(());
            }
            if started.elapsed() + delay > deadline {
                return Err(BackendError::Timeout(deadline));
            }
            tokio::time::sleep(delay).await;
            // Exponential backoff, capped at one minute between polls
            delay = (delay * 2).min(Duration::from_secs(60));
        }
    }
}

#[async_trait]
impl ResourceClient for CloudClient {
    async fn connect(&self, _credential: &PasswordCredential) -> Result<(), BackendError> {
        // Authentication travels with each REST call; nothing to pre-open.
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput, BackendError> {
        let instance_id = self.require_instance()?;
        let command = match working_dir {
            Some(dir) => format!("cd {} && {}", dir.display(), command),
            None => command.to_string(),
        };
        let timeout = self.execution_config.command_timeout();
        tokio::time::timeout(timeout, self.api.run_command(&instance_id, &command))
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
    }

    async fn transfer_in(&self, source: &Path, dest: &Path) -> Result<(), BackendError> {
        let instance_id = self.require_instance()?;
        let timeout = self.execution_config.transfer_timeout();
        tokio::time::timeout(timeout, self.api.upload_file(&instance_id, source, dest))
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
    }

    async fn transfer_out(&self, source: &Path, dest: &Path) -> Result<(), BackendError> {
        let instance_id = self.require_instance()?;
        let timeout = self.execution_config.transfer_timeout();
        tokio::time::timeout(timeout, self.api.download_file(&instance_id, source, dest))
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
    }

    async fn submit_job(&self, spec: &JobSpec) -> Result<RemoteJobId, BackendError> {
        let instance_id = self.require_instance()?;
        // Detach so the job outlives the API call; its lifecycle is tracked
        // through the instance.
        let command = format!(
            "cd {} && nohup {} > job.out 2> job.err &",
            spec.working_dir.display(),
            spec.command
        );
        let output = self.api.run_command(&instance_id, &command).await?;
        if !output.succeeded() {
            return Err(BackendError::Submission(output.stderr.trim().to_string()));
        }
        Ok(RemoteJobId::new(instance_id))
    }

    async fn cancel_job(&self, job_id: &RemoteJobId) -> Result<(), BackendError> {
        self.terminate_and_confirm(job_id.as_str()).await
    }

    async fn query_job_state(&self, job_id: &RemoteJobId) -> Result<RemoteJobState, BackendError> {
        let state = self.api.describe_instance(job_id.as_str()).await?;
        Ok(match state {
            InstanceState::Pending => RemoteJobState::Submitted,
            InstanceState::Running => RemoteJobState::Active,
            InstanceState::ShuttingDown => RemoteJobState::Active,
            InstanceState::Terminated => RemoteJobState::Complete,
            InstanceState::Unknown => RemoteJobState::Unknown,
        })
    }
}

pub mod testing {
    //! Scripted cloud API used by unit and integration tests.

    use super::*;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    pub struct FakeCloudApi {
        next_id: AtomicU32,
        /// instance id -> remaining describe calls before Running/Terminated
        pub instances: DashMap<String, InstanceLifecycle>,
        pub deleted_security_groups: Mutex<Vec<String>>,
        pub deleted_keypairs: Mutex<Vec<String>>,
        pub fail_security_group_delete: AtomicBool,
        pub commands: Mutex<Vec<(String, String)>>,
    }

    #[derive(Debug, Clone)]
    pub struct InstanceLifecycle {
        pub state: InstanceState,
        /// Describe calls remaining before the pending transition lands.
        pub settles_in: u32,
        pub target: InstanceState,
    }

    impl FakeCloudApi {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl CloudApi for FakeCloudApi {
        async fn provision_instance(&self, _spec: &InstanceSpec) -> Result<String, BackendError> {
            let id = format!("i-{:05}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.instances.insert(
                id.clone(),
                InstanceLifecycle {
                    state: InstanceState::Pending,
                    settles_in: 1,
                    target: InstanceState::Running,
                },
            );
            Ok(id)
        }

        async fn terminate_instance(&self, instance_id: &str) -> Result<(), BackendError> {
            let mut entry = self.instances.get_mut(instance_id).ok_or_else(|| {
                BackendError::Provisioning(format!("unknown instance {instance_id}"))
            })?;
            entry.state = InstanceState::ShuttingDown;
            entry.settles_in = 1;
            entry.target = InstanceState::Terminated;
            Ok(())
        }

        async fn describe_instance(
            &self,
            instance_id: &str,
        ) -> Result<InstanceState, BackendError> {
            let Some(mut entry) = self.instances.get_mut(instance_id) else {
                return Ok(InstanceState::Unknown);
            };
            if entry.settles_in > 0 {
                entry.settles_in -= 1;
                Ok(entry.state)
            } else {
                entry.state = entry.target;
                Ok(entry.state)
            }
        }

        async fn delete_security_group(&self, group: &str) -> Result<(), BackendError> {
            if self.fail_security_group_delete.load(Ordering::SeqCst) {
                return Err(BackendError::Execution(
                    "security group still has dependent resources".to_string(),
                ));
            }
            self.deleted_security_groups.lock().push(group.to_string());
            Ok(())
        }

        async fn delete_keypair(&self, name: &str) -> Result<(), BackendError> {
            self.deleted_keypairs.lock().push(name.to_string());
            Ok(())
        }

        async fn run_command(
            &self,
            instance_id: &str,
            command: &str,
        ) -> Result<CommandOutput, BackendError> {
            self.commands
                .lock()
                .push((instance_id.to_string(), command.to_string()));
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn upload_file(
            &self,
            _instance_id: &str,
            _source: &Path,
            _dest: &Path,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        async fn download_file(
            &self,
            _instance_id: &str,
            _source: &Path,
            _dest: &Path,
        ) -> Result<(), BackendError> {
            Ok(())
        }
    }
}
