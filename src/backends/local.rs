//! Local backend: commands run on the orchestrator host, transfers are
//! filesystem copies, "remote jobs" are spawned child processes.

use super::{BackendError, CommandOutput, JobSpec, ResourceClient};
use crate::clients::PasswordCredential;
use crate::config::ExecutionConfig;
use crate::models::{RemoteJobId, RemoteJobState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tracks one spawned child and its observed terminal state.
struct LocalJob {
    child: Mutex<Child>,
    /// Set once try_wait observes exit, since a child can be reaped only once.
    finished: Mutex<Option<RemoteJobState>>,
}

pub struct LocalClient {
    config: ExecutionConfig,
    jobs: DashMap<RemoteJobId, Arc<LocalJob>>,
}

impl LocalClient {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            jobs: DashMap::new(),
        }
    }

    fn shell_command(command: &str, working_dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl ResourceClient for LocalClient {
    async fn connect(&self, _credential: &PasswordCredential) -> Result<(), BackendError> {
        // No network involved.
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput, BackendError> {
        let timeout = self.config.command_timeout();
        let mut cmd = Self::shell_command(command, working_dir);

        let output = tokio::time::timeout(timeout, async {
            cmd.output()
                .await
                .map_err(|e| BackendError::Execution(format!("failed to spawn `{command}`: {e}")))
        })
        .await
        .map_err(|_| BackendError::Timeout(timeout))??;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn transfer_in(&self, source: &Path, dest: &Path) -> Result<(), BackendError> {
        copy_file(source, dest, self.config.transfer_timeout()).await
    }

    async fn transfer_out(&self, source: &Path, dest: &Path) -> Result<(), BackendError> {
        copy_file(source, dest, self.config.transfer_timeout()).await
    }

    async fn submit_job(&self, spec: &JobSpec) -> Result<RemoteJobId, BackendError> {
        let mut cmd = Self::shell_command(&spec.command, Some(&spec.working_dir));
        for (key, value) in &spec.environment {
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .map_err(|e| BackendError::Submission(format!("failed to spawn job: {e}")))?;
        let pid = child.id().unwrap_or_default();
        let job_id = RemoteJobId::new(format!("local-{pid}"));

        debug!(job_id = %job_id, name = %spec.name, "Spawned local job");
        self.jobs.insert(
            job_id.clone(),
            Arc::new(LocalJob {
                child: Mutex::new(child),
                finished: Mutex::new(None),
            }),
        );
        Ok(job_id)
    }

    async fn cancel_job(&self, job_id: &RemoteJobId) -> Result<(), BackendError> {
        let Some(job) = self.jobs.get(job_id).map(|entry| Arc::clone(&entry)) else {
            warn!(job_id = %job_id, "Cancel requested for unknown local job");
            return Ok(());
        };

        let mut child = job.child.lock().await;
        child
            .kill()
            .await
            .map_err(|e| BackendError::Cancellation(format!("kill failed: {e}")))?;
        *job.finished.lock().await = Some(RemoteJobState::Canceled);
        Ok(())
    }

    async fn query_job_state(&self, job_id: &RemoteJobId) -> Result<RemoteJobState, BackendError> {
        let Some(job) = self.jobs.get(job_id).map(|entry| Arc::clone(&entry)) else {
            return Ok(RemoteJobState::Unknown);
        };

        let mut finished = job.finished.lock().await;
        if let Some(state) = *finished {
            return Ok(state);
        }

        let mut child = job.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                let state = if status.success() {
                    RemoteJobState::Complete
                } else {
                    RemoteJobState::Failed
                };
                *finished = Some(state);
                Ok(state)
            }
            Ok(None) => Ok(RemoteJobState::Active),
            Err(e) => Err(BackendError::Execution(format!(
                "failed to poll local job: {e}"
            ))),
        }
    }
}

async fn copy_file(
    source: &Path,
    dest: &Path,
    timeout: std::time::Duration,
) -> Result<(), BackendError> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::time::timeout(timeout, async move {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::Transfer(format!("mkdir {}: {e}", parent.display())))?;
        }
        tokio::fs::copy(&source, &dest).await.map_err(|e| {
            BackendError::Transfer(format!(
                "copy {} -> {}: {e}",
                source.display(),
                dest.display()
            ))
        })?;
        Ok(())
    })
    .await
    .map_err(|_| BackendError::Timeout(timeout))?
}
