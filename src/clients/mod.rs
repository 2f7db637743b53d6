//! # External Collaborator Clients
//!
//! Narrow async contracts for the collaborators the orchestration core talks
//! to: the process/task status registry, the credential service and the
//! durable process store. Each trait ships with an in-memory implementation
//! used by tests and embedders that keep everything in one address space.

pub mod credentials;
pub mod process_store;
pub mod status;

pub use credentials::{CredentialClient, CredentialError, InMemoryCredentialClient, PasswordCredential};
pub use process_store::{InMemoryProcessStore, ProcessStore, ProcessStoreError};
pub use status::{
    InMemoryStatusClient, ProcessStatusClient, ProcessStatusUpdate, RetryingStatusWriter,
    StatusClientError, TaskStatusClient, TaskStatusUpdate,
};
