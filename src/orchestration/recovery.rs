//! # Recovery Handler
//!
//! Restart-time rediscovery of in-flight processes. The coordination store
//! knows which processes this worker had claimed; for each one the handler
//! decides between terminate (a cancellation flag was set during the outage)
//! and resume (pick up at the last known task index, never at the start).
//! After recovery the handler keeps watching the coordination store so
//! cancellations flagged while the worker is up tear down the live manager.
//!
//! Processes recover independently: one bad snapshot or one failing backend
//! never aborts recovery of the rest.

use super::lifecycle::{ManagerRegistry, ProcessLifecycleManager};
use crate::clients::ProcessStore;
use crate::coordination::{CoordinationEvent, CoordinationService};
use crate::error::{GridflowError, Result};
use crate::models::{Process, ProcessId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Builds a manager for a persisted process snapshot. The embedder supplies
/// the backend client and task chain wiring; recovery stays agnostic of
/// backend families.
#[async_trait]
pub trait ManagerBuilder: Send + Sync {
    async fn build(&self, process: Process) -> Result<Arc<ProcessLifecycleManager>>;
}

/// What happened to each claimed process during recovery.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub resumed: Vec<ProcessId>,
    pub terminated: Vec<ProcessId>,
    /// Already terminal in the store; claim released, nothing to do.
    pub skipped: Vec<ProcessId>,
    /// Recovery of this process failed; logged and left for the operator.
    pub failed: Vec<ProcessId>,
}

enum Recovered {
    Resumed,
    Terminated,
    Skipped,
}

pub struct RecoveryHandler {
    worker_id: String,
    coordination: Arc<dyn CoordinationService>,
    store: Arc<dyn ProcessStore>,
    builder: Arc<dyn ManagerBuilder>,
    registry: Arc<ManagerRegistry>,
}

impl RecoveryHandler {
    pub fn new(
        worker_id: impl Into<String>,
        coordination: Arc<dyn CoordinationService>,
        store: Arc<dyn ProcessStore>,
        builder: Arc<dyn ManagerBuilder>,
        registry: Arc<ManagerRegistry>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            coordination,
            store,
            builder,
            registry,
        }
    }

    /// Recover every process claimed by this worker.
    pub async fn recover(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        let claimed = match self.coordination.claimed_processes(&self.worker_id).await {
            Ok(claimed) => claimed,
            Err(err) => {
                error!(
                    worker_id = %self.worker_id,
                    error = %err,
                    "Coordination store unreachable; recovery aborted"
                );
                return report;
            }
        };

        info!(
            worker_id = %self.worker_id,
            count = claimed.len(),
            "Recovering claimed processes"
        );

        for process_id in claimed {
            match self.recover_one(process_id).await {
                Ok(Recovered::Resumed) => report.resumed.push(process_id),
                Ok(Recovered::Terminated) => report.terminated.push(process_id),
                Ok(Recovered::Skipped) => report.skipped.push(process_id),
                Err(err) => {
                    error!(
                        worker_id = %self.worker_id,
                        %process_id,
                        error = %err,
                        "Process recovery failed; continuing with the rest"
                    );
                    report.failed.push(process_id);
                }
            }
        }

        report
    }

    async fn recover_one(&self, process_id: ProcessId) -> Result<Recovered> {
        let process = self
            .store
            .fetch(process_id)
            .await
            .map_err(|err| GridflowError::transient("process fetch", err))?;

        if process.state.is_terminal() {
            self.release_claim(process_id).await;
            return Ok(Recovered::Skipped);
        }

        let cancelled = self
            .coordination
            .cancellation_requested(process_id)
            .await
            .map_err(|err| GridflowError::transient("cancellation flag read", err))?;

        let manager = self.builder.build(process).await?;
        self.registry.register(manager.clone());

        if cancelled {
            info!(%process_id, "Cancellation flagged during outage; terminating");
            manager
                .cancel("cancellation requested while worker was down")
                .await?;
            self.registry.remove(process_id);
            self.release_claim(process_id).await;
            return Ok(Recovered::Terminated);
        }

        manager.resume().await?;
        Ok(Recovered::Resumed)
    }

    /// Watch the coordination store for cancellation flags and tear down the
    /// matching live manager: cancel, deregister, release the claim. Flags
    /// for processes this worker does not manage are ignored.
    pub fn spawn_cancellation_watch(&self) -> JoinHandle<()> {
        // Subscribe before spawning so no flag raised after this call is missed
        let mut events = self.coordination.watch();
        let coordination = self.coordination.clone();
        let registry = self.registry.clone();
        let worker_id = self.worker_id.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CoordinationEvent::CancellationFlagged { process_id }) => {
                        let Some(manager) = registry.get(process_id) else {
                            continue;
                        };
                        info!(%process_id, "Cancellation flagged; terminating");
                        if let Err(err) = manager
                            .cancel("cancellation requested via coordination")
                            .await
                        {
                            error!(%process_id, error = %err, "Cancellation failed");
                            continue;
                        }
                        registry.remove(process_id);
                        if let Err(err) = coordination.release(&worker_id, process_id).await {
                            warn!(
                                worker_id = %worker_id,
                                %process_id,
                                error = %err,
                                "Claim release failed"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Coordination watch lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn release_claim(&self, process_id: ProcessId) {
        if let Err(err) = self.coordination.release(&self.worker_id, process_id).await {
            warn!(
                worker_id = %self.worker_id,
                %process_id,
                error = %err,
                "Claim release failed"
            );
        }
    }
}
