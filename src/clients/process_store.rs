//! Durable process snapshot store.
//!
//! The lifecycle manager checkpoints its process after every accepted
//! transition so the recovery handler can rebuild managers after a restart.
//! Storage technology is an external concern; this is the narrow contract.

use crate::models::{Process, ProcessId};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ProcessStoreError {
    #[error("process store unreachable: {0}")]
    Unreachable(String),

    #[error("process {0} not found")]
    NotFound(ProcessId),
}

#[async_trait]
pub trait ProcessStore: Send + Sync {
    async fn save(&self, process: &Process) -> Result<(), ProcessStoreError>;
    async fn fetch(&self, process_id: ProcessId) -> Result<Process, ProcessStoreError>;
}

/// In-memory process store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryProcessStore {
    processes: DashMap<ProcessId, Process>,
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn save(&self, process: &Process) -> Result<(), ProcessStoreError> {
        self.processes.insert(process.id, process.clone());
        Ok(())
    }

    async fn fetch(&self, process_id: ProcessId) -> Result<Process, ProcessStoreError> {
        self.processes
            .get(&process_id)
            .map(|entry| entry.clone())
            .ok_or(ProcessStoreError::NotFound(process_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendKind, ComputeDescriptor};
    use std::path::PathBuf;

    #[tokio::test]
    async fn save_and_fetch_round_trip() {
        let store = InMemoryProcessStore::new();
        let process = Process::new(
            "exp-9",
            ComputeDescriptor {
                backend: BackendKind::Hpc,
                host: "cluster.example.edu".to_string(),
                working_dir: PathBuf::from("/scratch/exp-9"),
                input_dir: PathBuf::from("/data/in"),
                output_dir: PathBuf::from("/data/out"),
                credential_token: "token".to_string(),
                owner: "alice".to_string(),
            },
        );
        let id = process.id;

        store.save(&process).await.unwrap();
        let fetched = store.fetch(id).await.unwrap();
        assert_eq!(fetched.experiment_id, "exp-9");

        assert!(matches!(
            store.fetch(ProcessId::new()).await,
            Err(ProcessStoreError::NotFound(_))
        ));
    }
}
