//! # Backend Resource Clients
//!
//! One interface over heterogeneous compute resources: the local host, an
//! HPC batch scheduler reached over a secure-shell session, and a cloud IaaS
//! API. Tasks talk to whichever client their process's compute descriptor
//! selected; they never know which backend family they are on.
//!
//! Every network-facing operation carries an explicit timeout, and sessions
//! are scoped resources released on every exit path.

pub mod cloud;
pub mod hpc;
pub mod local;

pub use cloud::{CloudApi, CloudClient, CloudResources, InstanceSpec, InstanceState};
pub use hpc::{HpcClient, RemoteSession, SessionTransport};
pub use local::LocalClient;

use crate::clients::PasswordCredential;
use crate::models::{RemoteJobId, RemoteJobState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Captured output of one command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Description of one unit of work to hand to a backend scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub environment: HashMap<String, String>,
    /// Node count hint for batch schedulers; ignored elsewhere.
    pub node_count: u32,
    /// Wall-time hint for batch schedulers, in minutes.
    pub wall_time_minutes: u32,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir,
            environment: HashMap::new(),
            node_count: 1,
            wall_time_minutes: 30,
        }
    }
}

/// Errors raised by backend clients.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("command execution failed: {0}")]
    Execution(String),

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("job cancellation failed: {0}")]
    Cancellation(String),

    #[error("instance provisioning failed: {0}")]
    Provisioning(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Whether this is infrastructure flakiness (retryable) rather than a
    /// deterministic failure of the work itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Uniform contract over one compute resource.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Establish (or verify) connectivity using the given credential. No-op
    /// for the local backend.
    async fn connect(&self, credential: &PasswordCredential) -> Result<(), BackendError>;

    /// Run a command, capturing stdout/stderr and the exit code.
    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput, BackendError>;

    /// Stage a file onto the backend.
    async fn transfer_in(&self, source: &Path, dest: &Path) -> Result<(), BackendError>;

    /// Stage a file off the backend.
    async fn transfer_out(&self, source: &Path, dest: &Path) -> Result<(), BackendError>;

    /// Dispatch a job to the backend scheduler.
    async fn submit_job(&self, spec: &JobSpec) -> Result<RemoteJobId, BackendError>;

    /// Best-effort cancellation of a dispatched job.
    async fn cancel_job(&self, job_id: &RemoteJobId) -> Result<(), BackendError>;

    /// Current scheduler-visible state of a dispatched job.
    async fn query_job_state(&self, job_id: &RemoteJobId) -> Result<RemoteJobState, BackendError>;
}
