use super::{CoordinationError, CoordinationEvent, CoordinationService};
use crate::models::ProcessId;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// In-memory coordination backend for tests and single-node deployments.
#[derive(Debug)]
pub struct InMemoryCoordination {
    /// process id -> owning worker id
    claims: DashMap<ProcessId, String>,
    cancellation_flags: DashMap<ProcessId, ()>,
    events: broadcast::Sender<CoordinationEvent>,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            claims: DashMap::new(),
            cancellation_flags: DashMap::new(),
            events,
        }
    }
}

impl Default for InMemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationService for InMemoryCoordination {
    async fn claim(
        &self,
        worker_id: &str,
        process_id: ProcessId,
    ) -> Result<(), CoordinationError> {
        match self.claims.entry(process_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get() == worker_id {
                    Ok(())
                } else {
                    Err(CoordinationError::AlreadyClaimed {
                        process_id,
                        worker_id: existing.get().clone(),
                    })
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(worker_id.to_string());
                let _ = self.events.send(CoordinationEvent::ProcessClaimed {
                    worker_id: worker_id.to_string(),
                    process_id,
                });
                Ok(())
            }
        }
    }

    async fn release(
        &self,
        worker_id: &str,
        process_id: ProcessId,
    ) -> Result<(), CoordinationError> {
        let removed = self
            .claims
            .remove_if(&process_id, |_, owner| owner == worker_id);
        if removed.is_some() {
            let _ = self.events.send(CoordinationEvent::ProcessReleased {
                worker_id: worker_id.to_string(),
                process_id,
            });
        }
        Ok(())
    }

    async fn claimed_processes(
        &self,
        worker_id: &str,
    ) -> Result<Vec<ProcessId>, CoordinationError> {
        Ok(self
            .claims
            .iter()
            .filter(|entry| entry.value() == worker_id)
            .map(|entry| *entry.key())
            .collect())
    }

    async fn flag_cancellation(&self, process_id: ProcessId) -> Result<(), CoordinationError> {
        self.cancellation_flags.insert(process_id, ());
        let _ = self
            .events
            .send(CoordinationEvent::CancellationFlagged { process_id });
        Ok(())
    }

    async fn cancellation_requested(
        &self,
        process_id: ProcessId,
    ) -> Result<bool, CoordinationError> {
        Ok(self.cancellation_flags.contains_key(&process_id))
    }

    fn watch(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_is_exclusive_per_process() {
        let coordination = InMemoryCoordination::new();
        let process_id = ProcessId::new();

        coordination.claim("worker-a", process_id).await.unwrap();
        // Re-claiming by the same worker is idempotent
        coordination.claim("worker-a", process_id).await.unwrap();

        let err = coordination.claim("worker-b", process_id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::AlreadyClaimed { .. }));
    }

    #[tokio::test]
    async fn release_only_honors_the_owner() {
        let coordination = InMemoryCoordination::new();
        let process_id = ProcessId::new();
        coordination.claim("worker-a", process_id).await.unwrap();

        coordination.release("worker-b", process_id).await.unwrap();
        assert_eq!(
            coordination.claimed_processes("worker-a").await.unwrap(),
            vec![process_id]
        );

        coordination.release("worker-a", process_id).await.unwrap();
        assert!(coordination
            .claimed_processes("worker-a")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cancellation_flag_round_trip() {
        let coordination = InMemoryCoordination::new();
        let process_id = ProcessId::new();

        assert!(!coordination.cancellation_requested(process_id).await.unwrap());
        coordination.flag_cancellation(process_id).await.unwrap();
        assert!(coordination.cancellation_requested(process_id).await.unwrap());
    }

    #[tokio::test]
    async fn watch_sees_claims() {
        let coordination = InMemoryCoordination::new();
        let mut watcher = coordination.watch();
        let process_id = ProcessId::new();

        coordination.claim("worker-a", process_id).await.unwrap();

        match watcher.recv().await.unwrap() {
            CoordinationEvent::ProcessClaimed { worker_id, .. } => {
                assert_eq!(worker_id, "worker-a");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
