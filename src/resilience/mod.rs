//! Retry and backoff primitives for transient infrastructure failures.

pub mod backoff;

pub use backoff::{retry_with_backoff, BackoffPolicy, RetryOutcome};
