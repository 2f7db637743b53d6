//! HPC backend: Slurm-shaped batch scheduler commands over a pooled
//! secure-shell session.
//!
//! The wire transport is behind the [`SessionTransport`] seam (key-based SSH
//! in production, a fake in tests). Sessions are pooled per host and reused
//! across tasks targeting the same host; a session serializes one command at
//! a time, enforced by a per-session async lock.

use super::{BackendError, CommandOutput, JobSpec, ResourceClient};
use crate::clients::PasswordCredential;
use crate::config::ExecutionConfig;
use crate::models::{RemoteJobId, RemoteJobState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// One established remote shell session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput, BackendError>;
    async fn upload(&self, source: &Path, dest: &Path) -> Result<(), BackendError>;
    async fn download(&self, source: &Path, dest: &Path) -> Result<(), BackendError>;
}

/// Opens remote sessions. The production implementation speaks SSH with
/// key-based auth; tests plug in a fake.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open(
        &self,
        host: &str,
        credential: &PasswordCredential,
    ) -> Result<Arc<dyn RemoteSession>, BackendError>;
}

struct PooledSession {
    session: Arc<dyn RemoteSession>,
    /// One command at a time per session.
    lock: Mutex<()>,
}

pub struct HpcClient {
    host: String,
    transport: Arc<dyn SessionTransport>,
    config: ExecutionConfig,
    sessions: DashMap<String, Arc<PooledSession>>,
}

impl HpcClient {
    pub fn new(
        host: impl Into<String>,
        transport: Arc<dyn SessionTransport>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            host: host.into(),
            transport,
            config,
            sessions: DashMap::new(),
        }
    }

    fn pooled_session(&self) -> Result<Arc<PooledSession>, BackendError> {
        self.sessions
            .get(&self.host)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| {
                BackendError::Connection(format!("no open session for host {}", self.host))
            })
    }

    async fn run_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, BackendError> {
        let pooled = self.pooled_session()?;
        let _serialized = pooled.lock.lock().await;
        tokio::time::timeout(timeout, pooled.session.run(command))
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
    }

    fn submission_command(spec: &JobSpec) -> String {
        let mut env_exports = String::new();
        for (key, value) in &spec.environment {
            env_exports.push_str(&format!("{key}={value} "));
        }
        format!(
            "{env_exports}sbatch --job-name={name} --chdir={dir} --ntasks={nodes} --time={minutes} --wrap '{command}'",
            name = spec.name,
            dir = spec.working_dir.display(),
            nodes = spec.node_count,
            minutes = spec.wall_time_minutes,
            command = spec.command,
        )
    }

    /// Parse `Submitted batch job 12345`.
    fn parse_submission_output(stdout: &str) -> Option<RemoteJobId> {
        stdout
            .split_whitespace()
            .last()
            .filter(|token| token.chars().all(|c| c.is_ascii_digit()))
            .map(RemoteJobId::new)
    }

    /// Map a Slurm state token to the engine's remote-job states.
    fn parse_scheduler_state(token: &str) -> RemoteJobState {
        // sacct suffixes cancelled-by-user entries ("CANCELLED by 1000")
        match token.trim().split_whitespace().next().unwrap_or("") {
            "PENDING" => RemoteJobState::Queued,
            "CONFIGURING" => RemoteJobState::Submitted,
            "RUNNING" | "COMPLETING" => RemoteJobState::Active,
            "SUSPENDED" => RemoteJobState::Suspended,
            "COMPLETED" => RemoteJobState::Complete,
            "CANCELLED" | "CANCELLED+" => RemoteJobState::Canceled,
            "FAILED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" => RemoteJobState::Failed,
            "" => RemoteJobState::Unknown,
            _ => RemoteJobState::Unknown,
        }
    }
}

#[async_trait]
impl ResourceClient for HpcClient {
    async fn connect(&self, credential: &PasswordCredential) -> Result<(), BackendError> {
        if self.sessions.contains_key(&self.host) {
            return Ok(());
        }
        let timeout = self.config.command_timeout();
        let session = tokio::time::timeout(timeout, self.transport.open(&self.host, credential))
            .await
            .map_err(|_| BackendError::Timeout(timeout))??;

        debug!(host = %self.host, "Opened remote session");
        self.sessions.insert(
            self.host.clone(),
            Arc::new(PooledSession {
                session,
                lock: Mutex::new(()),
            }),
        );
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput, BackendError> {
        let command = match working_dir {
            Some(dir) => format!("cd {} && {}", dir.display(), command),
            None => command.to_string(),
        };
        self.run_with_timeout(&command, self.config.command_timeout())
            .await
    }

    async fn transfer_in(&self, source: &Path, dest: &Path) -> Result<(), BackendError> {
        let pooled = self.pooled_session()?;
        let _serialized = pooled.lock.lock().await;
        let timeout = self.config.transfer_timeout();
        tokio::time::timeout(timeout, pooled.session.upload(source, dest))
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
    }

    async fn transfer_out(&self, source: &Path, dest: &Path) -> Result<(), BackendError> {
        let pooled = self.pooled_session()?;
        let _serialized = pooled.lock.lock().await;
        let timeout = self.config.transfer_timeout();
        tokio::time::timeout(timeout, pooled.session.download(source, dest))
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
    }

    async fn submit_job(&self, spec: &JobSpec) -> Result<RemoteJobId, BackendError> {
        let command = Self::submission_command(spec);
        let output = self
            .run_with_timeout(&command, self.config.command_timeout())
            .await?;

        if !output.succeeded() {
            return Err(BackendError::Submission(format!(
                "scheduler rejected job: {}",
                output.stderr.trim()
            )));
        }
        Self::parse_submission_output(&output.stdout).ok_or_else(|| {
            BackendError::Submission(format!(
                "could not parse job id from scheduler output: {}",
                output.stdout.trim()
            ))
        })
    }

    async fn cancel_job(&self, job_id: &RemoteJobId) -> Result<(), BackendError> {
        let output = self
            .run_with_timeout(
                &format!("scancel {}", job_id.as_str()),
                self.config.command_timeout(),
            )
            .await?;
        if output.succeeded() {
            Ok(())
        } else {
            Err(BackendError::Cancellation(output.stderr.trim().to_string()))
        }
    }

    async fn query_job_state(&self, job_id: &RemoteJobId) -> Result<RemoteJobState, BackendError> {
        // Live jobs show up in the queue; finished ones only in accounting.
        let queued = self
            .run_with_timeout(
                &format!("squeue -h -o %T -j {}", job_id.as_str()),
                self.config.command_timeout(),
            )
            .await?;
        if queued.succeeded() && !queued.stdout.trim().is_empty() {
            return Ok(Self::parse_scheduler_state(&queued.stdout));
        }

        let finished = self
            .run_with_timeout(
                &format!("sacct -n -X -o State -j {}", job_id.as_str()),
                self.config.command_timeout(),
            )
            .await?;
        Ok(Self::parse_scheduler_state(&finished.stdout))
    }
}
