//! # Configuration
//!
//! Typed configuration for the orchestration core with sensible defaults,
//! layered loading from an optional `gridflow.toml` and `GRIDFLOW_`-prefixed
//! environment variables.

use crate::resilience::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity of each typed execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Retry behavior for transient infrastructure errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    pub fn to_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// Remote-job monitoring behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Interval between job-state polls.
    pub poll_interval_ms: u64,
    /// Deadline for the remote job to reach a terminal state before the
    /// monitoring task reports a transient infrastructure error.
    pub terminal_deadline_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            terminal_deadline_ms: 300_000,
        }
    }
}

impl MonitoringConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn terminal_deadline(&self) -> Duration {
        Duration::from_millis(self.terminal_deadline_ms)
    }
}

/// Cloud instance lifecycle polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub provision_poll_interval_ms: u64,
    pub provision_deadline_ms: u64,
    pub terminate_deadline_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provision_poll_interval_ms: 5_000,
            provision_deadline_ms: 300_000,
            terminate_deadline_ms: 120_000,
        }
    }
}

impl CloudConfig {
    pub fn provision_poll_interval(&self) -> Duration {
        Duration::from_millis(self.provision_poll_interval_ms)
    }

    pub fn provision_deadline(&self) -> Duration {
        Duration::from_millis(self.provision_deadline_ms)
    }

    pub fn terminate_deadline(&self) -> Duration {
        Duration::from_millis(self.terminate_deadline_ms)
    }
}

/// Timeouts on individual backend operations. Every network call carries one
/// of these explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub command_timeout_ms: u64,
    pub transfer_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 60_000,
            transfer_timeout_ms: 300_000,
        }
    }
}

impl ExecutionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridflowConfig {
    pub queues: QueueConfig,
    pub backoff: BackoffConfig,
    pub monitoring: MonitoringConfig,
    pub cloud: CloudConfig,
    pub execution: ExecutionConfig,
}

impl GridflowConfig {
    /// Load configuration: defaults, overridden by `gridflow.toml` if
    /// present, overridden by `GRIDFLOW_`-prefixed environment variables
    /// (`GRIDFLOW_BACKOFF__MAX_ATTEMPTS=3`).
    pub fn load() -> crate::error::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("gridflow").required(false))
            .add_source(config::Environment::with_prefix("GRIDFLOW").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
