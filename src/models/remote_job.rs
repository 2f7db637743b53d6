//! Remote job states as reported by external schedulers and cloud APIs.
//!
//! A remote job's lifecycle is linked to but independent of its owning task:
//! the task completes only once the job reaches a terminal state matching
//! the task's success condition. The ids themselves live on the owning
//! [`TaskRecord`](super::TaskRecord), most recent last.

use serde::{Deserialize, Serialize};
use std::fmt;

/// States reported by external schedulers and cloud APIs for a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobState {
    Queued,
    Submitted,
    Active,
    Complete,
    Failed,
    Canceled,
    Suspended,
    Unknown,
    /// Failed in a way the backend considers recoverable or ignorable
    /// (for example a post-script error after the payload finished).
    NonCriticalFail,
}

impl RemoteJobState {
    /// Terminal states: the scheduler will report nothing further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Failed | Self::Canceled | Self::NonCriticalFail
        )
    }

    /// Whether this terminal state satisfies a task's success condition.
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Complete | Self::NonCriticalFail)
    }
}

impl fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Submitted => "submitted",
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Suspended => "suspended",
            Self::Unknown => "unknown",
            Self::NonCriticalFail => "non_critical_fail",
        };
        write!(f, "{name}")
    }
}
