//! # Orchestration
//!
//! The heart of the crate: typed execution queues, the per-process lifecycle
//! manager with its registry and event pump, and restart recovery. Everything
//! here is driven by task status events flowing over the broadcast channel;
//! backends and external stores stay behind their trait seams.

pub mod lifecycle;
pub mod queues;
pub mod recovery;

pub use lifecycle::{
    spawn_queue_workers, ManagerDeps, ManagerRegistry, ProcessLifecycleManager,
};
pub use queues::{
    phase_for, queue_for, QueueError, QueueName, QueuedTask, TaskQueueReceivers, TaskQueues,
};
pub use recovery::{ManagerBuilder, RecoveryHandler, RecoveryReport};
