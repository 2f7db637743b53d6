//! Job submission and remote-job monitoring.

use super::{backend_outcome, Task, TaskContext, TaskResult};
use crate::backends::JobSpec;
use crate::error::{GridflowError, Result};
use crate::models::TaskKind;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, warn};

/// Dispatches the process's payload to the backend scheduler.
///
/// At most one remote job may be active per submission task: a re-run checks
/// the previously recorded job before dispatching again, which also makes
/// at-least-once queue delivery safe.
pub struct JobSubmissionTask;

#[async_trait]
impl Task for JobSubmissionTask {
    fn kind(&self) -> TaskKind {
        TaskKind::JobSubmission
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let command = ctx.required_param("command")?;

        if let Some(previous) = ctx.record.active_remote_job() {
            match ctx.client.query_job_state(previous).await {
                Ok(state) if !state.is_terminal() => {
                    return Ok(TaskResult::completed(format!(
                        "remote job {previous} already active, not re-submitting"
                    ))
                    .with_remote_job(previous.clone()));
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    return Err(GridflowError::transient("pre-submission job check", err))
                }
                Err(_) => {}
            }
        }

        if let Some(credential) = &ctx.credential {
            if let Err(err) = ctx.client.connect(credential).await {
                return backend_outcome("backend connect", err);
            }
        }

        let mut spec = JobSpec::new(
            format!("gridflow-{}", ctx.process_id),
            command,
            ctx.compute.working_dir.clone(),
        );
        if let Some(nodes) = ctx.optional_param("node_count") {
            spec.node_count = nodes.parse().map_err(|_| {
                GridflowError::validation(format!("node_count `{nodes}` is not a number"))
            })?;
        }
        if let Some(minutes) = ctx.optional_param("wall_time_minutes") {
            spec.wall_time_minutes = minutes.parse().map_err(|_| {
                GridflowError::validation(format!("wall_time_minutes `{minutes}` is not a number"))
            })?;
        }

        match ctx.client.submit_job(&spec).await {
            Ok(job_id) => {
                info!(process_id = %ctx.process_id, remote_job = %job_id, "Job submitted");
                Ok(
                    TaskResult::completed(format!("remote job {job_id} submitted"))
                        .with_remote_job(job_id),
                )
            }
            Err(err) => backend_outcome("job submission", err),
        }
    }

    async fn cancel(&self, ctx: &TaskContext) {
        let Some(job_id) = ctx.record.active_remote_job().or(ctx.remote_job.as_ref()) else {
            return;
        };
        if let Err(err) = ctx.client.cancel_job(job_id).await {
            warn!(
                process_id = %ctx.process_id,
                remote_job = %job_id,
                error = %err,
                "Remote job cancellation failed during teardown"
            );
        }
    }
}

/// Waits for the process's remote job to reach a terminal state.
///
/// Deadline expiry is an infrastructure fault, not a job failure: the
/// lifecycle layer retries it per the backoff policy before escalating, and
/// never marks the process failed purely because monitoring timed out.
pub struct MonitoringTask;

#[async_trait]
impl Task for MonitoringTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Monitoring
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let Some(job_id) = ctx.remote_job.clone() else {
            return Ok(TaskResult::failed(
                "no remote job to monitor; job submission never recorded one",
            ));
        };

        let deadline = ctx.config.monitoring.terminal_deadline();
        let poll_interval = ctx.config.monitoring.poll_interval();
        let started = Instant::now();

        loop {
            match ctx.client.query_job_state(&job_id).await {
                Ok(state) if state.is_terminal() => {
                    return if state.is_successful() {
                        Ok(TaskResult::completed(format!(
                            "remote job {job_id} finished in state {state}"
                        ))
                        .with_remote_job(job_id))
                    } else {
                        Ok(TaskResult::failed(format!(
                            "remote job {job_id} ended in state {state}"
                        ))
                        .with_remote_job(job_id))
                    };
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    return Err(GridflowError::transient("job state query", err))
                }
                Err(err) => {
                    return Ok(TaskResult::failed(format!("job state query failed: {err}")))
                }
            }

            if started.elapsed() + poll_interval > deadline {
                return Err(GridflowError::transient(
                    "remote job monitoring",
                    format!("job {job_id} did not reach a terminal state within {deadline:?}"),
                ));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::LocalClient;
    use crate::config::{ExecutionConfig, GridflowConfig, MonitoringConfig};
    use crate::models::{BackendKind, ComputeDescriptor, ProcessId, TaskRecord};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    fn context(kind: TaskKind, working_dir: &Path) -> TaskContext {
        let process_id = ProcessId::new();
        TaskContext {
            process_id,
            record: TaskRecord::new(kind, process_id, 2),
            compute: ComputeDescriptor {
                backend: BackendKind::Local,
                host: "localhost".to_string(),
                working_dir: working_dir.to_path_buf(),
                input_dir: working_dir.to_path_buf(),
                output_dir: working_dir.to_path_buf(),
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
    async fn submission_without_command_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(TaskKind::JobSubmission, dir.path());

        let err = JobSubmissionTask.run(&ctx).await.unwrap_err();
        assert!(matches!(err, GridflowError::Validation { .. }));
    }

    #[tokio::test]
    async fn submission_dispatches_and_reports_remote_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(TaskKind::JobSubmission, dir.path());
        ctx.record
            .parameters
            .insert("command".to_string(), json!("true"));

        let result = JobSubmissionTask.run(&ctx).await.unwrap();
        assert!(result.is_completed());
        assert!(result.remote_job.is_some());
    }

    #[tokio::test]
    async fn monitoring_completes_when_job_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(TaskKind::Monitoring, dir.path());
        let mut config = GridflowConfig::default();
        config.monitoring = MonitoringConfig {
            poll_interval_ms: 10,
            terminal_deadline_ms: 10_000,
        };
        ctx.config = Arc::new(config);

        // Dispatch a quick job through the same client so monitoring can see it
        let spec = crate::backends::JobSpec::new("quick", "true", dir.path().to_path_buf());
        let job_id = ctx.client.submit_job(&spec).await.unwrap();
        ctx.remote_job = Some(job_id);

        let result = MonitoringTask.run(&ctx).await.unwrap();
        assert!(result.is_completed());
    }

    #[tokio::test]
    async fn monitoring_failure_state_is_a_task_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(TaskKind::Monitoring, dir.path());
        let mut config = GridflowConfig::default();
        config.monitoring = MonitoringConfig {
            poll_interval_ms: 10,
            terminal_deadline_ms: 10_000,
        };
        ctx.config = Arc::new(config);

        let spec = crate::backends::JobSpec::new("bad", "exit 7", dir.path().to_path_buf());
        let job_id = ctx.client.submit_job(&spec).await.unwrap();
        ctx.remote_job = Some(job_id);

        let result = MonitoringTask.run(&ctx).await.unwrap();
        assert!(!result.is_completed());
        assert!(result.message.contains("failed"));
    }

    #[tokio::test]
    async fn monitoring_deadline_is_an_infrastructure_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(TaskKind::Monitoring, dir.path());
        let mut config = GridflowConfig::default();
        config.monitoring = MonitoringConfig {
            poll_interval_ms: 5,
            terminal_deadline_ms: 20,
        };
        ctx.config = Arc::new(config);

        let spec = crate::backends::JobSpec::new("slow", "sleep 30", dir.path().to_path_buf());
        let job_id = ctx.client.submit_job(&spec).await.unwrap();
        ctx.remote_job = Some(job_id.clone());

        let err = MonitoringTask.run(&ctx).await.unwrap_err();
        assert!(err.is_transient());

        // Cleanup the sleeper
        ctx.client.cancel_job(&job_id).await.unwrap();
    }

    #[tokio::test]
    async fn monitoring_without_job_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(TaskKind::Monitoring, dir.path());
        let result = MonitoringTask.run(&ctx).await.unwrap();
        assert!(!result.is_completed());
    }

    #[tokio::test]
    async fn resubmission_with_live_job_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(TaskKind::JobSubmission, dir.path());
        ctx.record
            .parameters
            .insert("command".to_string(), json!("sleep 30"));

        let first = JobSubmissionTask.run(&ctx).await.unwrap();
        let job_id = first.remote_job.clone().unwrap();

        // Simulate redelivery: record now carries the live job
        ctx.record.add_remote_job(job_id.clone());
        let second = JobSubmissionTask.run(&ctx).await.unwrap();
        assert!(second.is_completed());
        assert_eq!(second.remote_job.unwrap(), job_id);
        assert!(second.message.contains("already active"));

        ctx.client.cancel_job(&job_id).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_tears_down_the_remote_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(TaskKind::JobSubmission, dir.path());
        ctx.record
            .parameters
            .insert("command".to_string(), json!("sleep 30"));

        let result = JobSubmissionTask.run(&ctx).await.unwrap();
        let job_id = result.remote_job.unwrap();
        ctx.record.add_remote_job(job_id.clone());

        JobSubmissionTask.cancel(&ctx).await;
        assert_eq!(
            ctx.client.query_job_state(&job_id).await.unwrap(),
            crate::models::RemoteJobState::Canceled
        );
    }
}
