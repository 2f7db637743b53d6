//! # Coordination Service
//!
//! Abstract distributed-coordination seam: which worker owns which in-flight
//! processes, and whether cancellation was requested for a process while its
//! worker was down. The recovery handler reads this on startup; claiming
//! enforces that no two managers ever run the same process concurrently.
//!
//! The production backend (ZooKeeper, etcd, a database with advisory locks)
//! is an external collaborator; the core is written and tested against this
//! trait.

pub mod in_memory;

pub use in_memory::InMemoryCoordination;

use crate::models::ProcessId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error, Clone)]
pub enum CoordinationError {
    #[error("coordination store unreachable: {0}")]
    Unreachable(String),

    #[error("process {process_id} already claimed by worker {worker_id}")]
    AlreadyClaimed {
        process_id: ProcessId,
        worker_id: String,
    },
}

/// Membership change notifications on the coordination key space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinationEvent {
    ProcessClaimed {
        worker_id: String,
        process_id: ProcessId,
    },
    ProcessReleased {
        worker_id: String,
        process_id: ProcessId,
    },
    CancellationFlagged {
        process_id: ProcessId,
    },
}

#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Claim exclusive ownership of a process for a worker. Fails if another
    /// worker holds the claim.
    async fn claim(&self, worker_id: &str, process_id: ProcessId)
        -> Result<(), CoordinationError>;

    /// Release a claim (process finished or handed off).
    async fn release(
        &self,
        worker_id: &str,
        process_id: ProcessId,
    ) -> Result<(), CoordinationError>;

    /// All processes currently claimed by the given worker.
    async fn claimed_processes(&self, worker_id: &str)
        -> Result<Vec<ProcessId>, CoordinationError>;

    /// Record that cancellation was requested for a process. Durable across
    /// worker outages.
    async fn flag_cancellation(&self, process_id: ProcessId) -> Result<(), CoordinationError>;

    /// Whether cancellation was requested for a process.
    async fn cancellation_requested(
        &self,
        process_id: ProcessId,
    ) -> Result<bool, CoordinationError>;

    /// Watch membership and cancellation changes.
    fn watch(&self) -> broadcast::Receiver<CoordinationEvent>;
}
