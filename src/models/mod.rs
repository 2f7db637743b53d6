//! # Data Model
//!
//! Core domain records for the orchestration engine: the [`Process`] being
//! driven through its task pipeline, the [`TaskRecord`]s that make up that
//! pipeline, and the [`RemoteJobId`]s those tasks dispatch to compute
//! backends.
//!
//! All status histories are append-only: a state change appends a timestamped
//! record with a human-readable reason, it never rewrites prior entries.

pub mod process;
pub mod remote_job;
pub mod task;

pub use process::{BackendKind, ComputeDescriptor, Process, ProcessError, ProcessStatusRecord};
pub use remote_job::RemoteJobState;
pub use task::{TaskKind, TaskRecord, TaskStatusRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one process (one scientific-computing execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one task within a process pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by an external scheduler or cloud API (batch job id,
/// instance id). Opaque to the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteJobId(pub String);

impl RemoteJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
