//! # Process State Machine
//!
//! State and event definitions plus the transition logic that moves a process
//! through its lifecycle. The machine is pure over the in-memory [`Process`]
//! record; persisting the resulting status is the lifecycle manager's job.
//!
//! [`Process`]: crate::models::Process

pub mod errors;
pub mod events;
pub mod machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ProcessEvent;
pub use machine::ProcessStateMachine;
pub use states::{ProcessState, TaskRunState};
