//! Workspace setup and teardown on the target backend.

use super::{backend_outcome, Task, TaskContext, TaskResult};
use crate::error::Result;
use crate::models::TaskKind;
use async_trait::async_trait;
use tracing::{info, warn};

/// Creates the process's working directory on the backend.
pub struct EnvSetupTask;

#[async_trait]
impl Task for EnvSetupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::EnvSetup
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        if let Some(credential) = &ctx.credential {
            if let Err(err) = ctx.client.connect(credential).await {
                return backend_outcome("backend connect", err);
            }
        }

        let working_dir = &ctx.compute.working_dir;
        let command = format!("mkdir -p {}", working_dir.display());
        match ctx.client.execute(&command, None).await {
            Ok(output) if output.succeeded() => {
                info!(process_id = %ctx.process_id, dir = %working_dir.display(), "Workspace configured");
                Ok(TaskResult::completed(format!(
                    "workspace {} created",
                    working_dir.display()
                )))
            }
            Ok(output) => Ok(TaskResult::failed(format!(
                "workspace creation failed: {}",
                output.stderr.trim()
            ))),
            Err(err) => backend_outcome("workspace creation", err),
        }
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}

/// Removes the process's working directory after outputs are staged out.
pub struct EnvCleanupTask;

#[async_trait]
impl Task for EnvCleanupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::EnvCleanup
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let working_dir = &ctx.compute.working_dir;
        // Refuse to remove anything shallower than two path components.
        if working_dir.components().count() < 3 {
            return Ok(TaskResult::failed(format!(
                "refusing to clean up suspicious working directory {}",
                working_dir.display()
            )));
        }

        let command = format!("rm -rf {}", working_dir.display());
        match ctx.client.execute(&command, None).await {
            Ok(output) if output.succeeded() => Ok(TaskResult::completed(format!(
                "workspace {} removed",
                working_dir.display()
            ))),
            Ok(output) => Ok(TaskResult::failed(format!(
                "workspace removal failed: {}",
                output.stderr.trim()
            ))),
            Err(err) => backend_outcome("workspace removal", err),
        }
    }

    async fn cancel(&self, ctx: &TaskContext) {
        warn!(process_id = %ctx.process_id, "Env cleanup canceled before completion");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::LocalClient;
    use crate::config::{ExecutionConfig, GridflowConfig};
    use crate::models::{BackendKind, ComputeDescriptor, ProcessId, TaskRecord};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn context(working_dir: PathBuf) -> TaskContext {
        let process_id = ProcessId::new();
        TaskContext {
            process_id,
            record: TaskRecord::new(TaskKind::EnvSetup, process_id, 0),
            compute: ComputeDescriptor {
                backend: BackendKind::Local,
                host: "localhost".to_string(),
                working_dir,
                input_dir: PathBuf::from("/tmp/in"),
                output_dir: PathBuf::from("/tmp/out"),
                credential_token: "token".to_string(),
                owner: "alice".to_string(),
            },
            client: Arc::new(LocalClient::new(ExecutionConfig::default())),
            credential: None,
            remote_job: None,
            config: Arc::new(GridflowConfig::default()),
        }
    }

    #[tokio::test]
    async fn env_setup_creates_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = dir.path().join("proc/workspace");
        let ctx = context(working_dir.clone());

        let result = EnvSetupTask.run(&ctx).await.unwrap();
        assert!(result.is_completed());
        assert!(working_dir.is_dir());
    }

    #[tokio::test]
    async fn env_cleanup_refuses_shallow_paths() {
        let ctx = context(PathBuf::from("/tmp"));
        let result = EnvCleanupTask.run(&ctx).await.unwrap();
        assert!(!result.is_completed());
        assert!(result.message.contains("refusing"));
    }

    #[tokio::test]
    async fn env_cleanup_removes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = dir.path().join("proc/workspace");
        std::fs::create_dir_all(&working_dir).unwrap();
        let ctx = context(working_dir.clone());

        let result = EnvCleanupTask.run(&ctx).await.unwrap();
        assert!(result.is_completed());
        assert!(!working_dir.exists());
    }
}
