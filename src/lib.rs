//! # Gridflow Core
//!
//! Process/task lifecycle orchestration for scientific computing workloads.
//! A process is one experiment execution: an ordered pipeline of tasks
//! (environment setup, data staging in, job submission, monitoring, data
//! staging out, cleanup) driven across pluggable compute backends — the local
//! host, an HPC batch scheduler reached over a secure-shell session, or a
//! cloud IaaS API.
//!
//! ## Architecture
//!
//! - [`models`] — process, task and remote-job records with append-only
//!   status histories.
//! - [`state_machine`] — the process lifecycle state machine.
//! - [`backends`] — the `ResourceClient` seam and its local/HPC/cloud
//!   implementations.
//! - [`tasks`] — the uniform task contract, the concrete task types and the
//!   backend-keyed factory.
//! - [`orchestration`] — typed execution queues, the per-process lifecycle
//!   manager with its event pump, and restart recovery.
//! - [`clients`], [`coordination`] — narrow async traits for the external
//!   collaborators (status registry, credential service, process store,
//!   distributed coordination), each with an in-memory implementation.
//! - [`events`] — broadcast status propagation decoupling task execution
//!   from lifecycle advancement.
//! - [`resilience`], [`error`], [`config`], [`logging`] — ambient concerns.
//!
//! ## Flow
//!
//! Recovery or an external trigger builds a [`ProcessLifecycleManager`]; the
//! manager asks the [`TaskFactory`] for the task chain and submits the first
//! task to its typed queue; a queue worker executes it against the backend
//! client; the resulting status event flows back over the broadcast channel
//! to the manager, which advances the pipeline or closes the process out.
//!
//! [`ProcessLifecycleManager`]: orchestration::ProcessLifecycleManager
//! [`TaskFactory`]: tasks::TaskFactory

pub mod backends;
pub mod clients;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod state_machine;
pub mod tasks;

pub use config::GridflowConfig;
pub use error::{GridflowError, Result};
pub use models::{Process, ProcessId, RemoteJobId, TaskId, TaskKind};
pub use orchestration::{ManagerRegistry, ProcessLifecycleManager, RecoveryHandler};
pub use state_machine::{ProcessState, TaskRunState};
pub use tasks::{Task, TaskContext, TaskFactory, TaskResult};
