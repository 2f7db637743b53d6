use serde::{Deserialize, Serialize};
use std::fmt;

/// Process lifecycle states.
///
/// The nominal path is Created through Completed in declaration order, but
/// phase states are entered in whatever order the process's task chain
/// dictates (a chain with no staging steps jumps straight to Executing).
/// Failed and Canceling/Canceled are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Initial state when the process is created
    Created,
    /// Inputs and configuration checked
    Validated,
    /// Lifecycle manager has taken ownership
    Started,
    PreProcessing,
    ConfiguringWorkspace,
    InputDataStaging,
    Executing,
    Monitoring,
    OutputDataStaging,
    PostProcessing,
    /// Terminal: every task in the chain completed
    Completed,
    /// Terminal: a task failed; no further tasks were submitted
    Failed,
    /// Cancellation requested, best-effort teardown in progress
    Canceling,
    /// Terminal: cancellation finished (regardless of teardown sub-step
    /// success)
    Canceled,
}

impl ProcessState {
    /// Terminal states accept no further task-completion events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Execution-phase states a running pipeline moves between as tasks of
    /// different kinds are submitted.
    pub fn is_phase(&self) -> bool {
        matches!(
            self,
            Self::PreProcessing
                | Self::ConfiguringWorkspace
                | Self::InputDataStaging
                | Self::Executing
                | Self::Monitoring
                | Self::OutputDataStaging
                | Self::PostProcessing
        )
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Validated => "validated",
            Self::Started => "started",
            Self::PreProcessing => "pre_processing",
            Self::ConfiguringWorkspace => "configuring_workspace",
            Self::InputDataStaging => "input_data_staging",
            Self::Executing => "executing",
            Self::Monitoring => "monitoring",
            Self::OutputDataStaging => "output_data_staging",
            Self::PostProcessing => "post_processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ProcessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "validated" => Ok(Self::Validated),
            "started" => Ok(Self::Started),
            "pre_processing" => Ok(Self::PreProcessing),
            "configuring_workspace" => Ok(Self::ConfiguringWorkspace),
            "input_data_staging" => Ok(Self::InputDataStaging),
            "executing" => Ok(Self::Executing),
            "monitoring" => Ok(Self::Monitoring),
            "output_data_staging" => Ok(Self::OutputDataStaging),
            "post_processing" => Ok(Self::PostProcessing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid process state: {s}")),
        }
    }
}

/// Task run states. Status records append these; the latest record is the
/// task's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunState {
    Created,
    Executing,
    Completed,
    Failed,
    Canceling,
    Canceled,
}

impl TaskRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Executing)
    }
}

impl Default for TaskRunState {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for TaskRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
        };
        write!(f, "{name}")
    }
}
