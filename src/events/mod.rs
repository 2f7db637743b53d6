//! Asynchronous status propagation between task execution and the lifecycle
//! managers, decoupled through a broadcast channel.

pub mod publisher;

pub use publisher::{GridflowEvent, StatusEventPublisher, TaskStatusEvent};
