use std::fmt;

use serde::{Deserialize, Serialize};

/// Local lifecycle status of a transformation job.
///
/// A job attempt moves forward through: NotStarted → Running → terminal.
/// The only backwards edge is the Running ↔ WaitingForUserInput oscillation
/// that happens while a human-in-the-loop episode is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    NotStarted,
    Running,
    WaitingForUserInput,
    Cancelled,
    Failed,
    Succeeded,
    PartiallySucceeded,
}

impl JobStatus {
    /// Terminal statuses end the attempt; nothing moves out of them except a reset.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Cancelled
                | JobStatus::Failed
                | JobStatus::Succeeded
                | JobStatus::PartiallySucceeded
        )
    }

    /// Whether moving from `self` to `next` respects the status invariant.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (NotStarted, Running) => true,
            (Running, WaitingForUserInput) | (WaitingForUserInput, Running) => true,
            (Running | WaitingForUserInput, b) => b.is_terminal(),
            // Failures before the job ever ran (e.g. packaging) still end the attempt.
            (NotStarted, b) => b.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::NotStarted => write!(f, "Not Started"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::WaitingForUserInput => write!(f, "Waiting For User Input"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::PartiallySucceeded => write!(f, "Partially Succeeded"),
        }
    }
}

/// Status strings reported by the remote transformation service, wrapped at the
/// client boundary so nothing else matches on raw strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteStatus {
    Created,
    Accepted,
    Rejected,
    Started,
    Preparing,
    Prepared,
    Planning,
    Planned,
    Transforming,
    Transformed,
    Paused,
    Resumed,
    PartiallyCompleted,
    Completed,
    Failed,
    Stopping,
    Stopped,
    Unknown(String),
}

impl RemoteStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Created => "CREATED",
            RemoteStatus::Accepted => "ACCEPTED",
            RemoteStatus::Rejected => "REJECTED",
            RemoteStatus::Started => "STARTED",
            RemoteStatus::Preparing => "PREPARING",
            RemoteStatus::Prepared => "PREPARED",
            RemoteStatus::Planning => "PLANNING",
            RemoteStatus::Planned => "PLANNED",
            RemoteStatus::Transforming => "TRANSFORMING",
            RemoteStatus::Transformed => "TRANSFORMED",
            RemoteStatus::Paused => "PAUSED",
            RemoteStatus::Resumed => "RESUMED",
            RemoteStatus::PartiallyCompleted => "PARTIALLY_COMPLETED",
            RemoteStatus::Completed => "COMPLETED",
            RemoteStatus::Failed => "FAILED",
            RemoteStatus::Stopping => "STOPPING",
            RemoteStatus::Stopped => "STOPPED",
            RemoteStatus::Unknown(raw) => raw,
        }
    }

    /// The remote job ended without producing a usable result.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Failed
                | RemoteStatus::Stopping
                | RemoteStatus::Stopped
                | RemoteStatus::Rejected
        )
    }

    /// The remote job produced a result, fully or in part.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Completed | RemoteStatus::PartiallyCompleted
        )
    }
}

impl From<String> for RemoteStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "CREATED" => RemoteStatus::Created,
            "ACCEPTED" => RemoteStatus::Accepted,
            "REJECTED" => RemoteStatus::Rejected,
            "STARTED" => RemoteStatus::Started,
            "PREPARING" => RemoteStatus::Preparing,
            "PREPARED" => RemoteStatus::Prepared,
            "PLANNING" => RemoteStatus::Planning,
            "PLANNED" => RemoteStatus::Planned,
            "TRANSFORMING" => RemoteStatus::Transforming,
            "TRANSFORMED" => RemoteStatus::Transformed,
            "PAUSED" => RemoteStatus::Paused,
            "RESUMED" => RemoteStatus::Resumed,
            "PARTIALLY_COMPLETED" => RemoteStatus::PartiallyCompleted,
            "COMPLETED" => RemoteStatus::Completed,
            "FAILED" => RemoteStatus::Failed,
            "STOPPING" => RemoteStatus::Stopping,
            "STOPPED" => RemoteStatus::Stopped,
            _ => RemoteStatus::Unknown(raw),
        }
    }
}

impl From<&str> for RemoteStatus {
    fn from(raw: &str) -> Self {
        RemoteStatus::from(raw.to_string())
    }
}

impl From<RemoteStatus> for String {
    fn from(status: RemoteStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed sets of remote statuses a polling loop treats as "reached".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSet {
    /// A plan exists (or the job already went past planning), or the job failed.
    PlanReady,
    /// The job is terminal or paused for input.
    CompletionReady,
}

impl StatusSet {
    pub fn contains(self, status: &RemoteStatus) -> bool {
        match self {
            StatusSet::PlanReady => {
                status.is_failure()
                    || matches!(
                        status,
                        RemoteStatus::Planned
                            | RemoteStatus::Transforming
                            | RemoteStatus::Transformed
                            | RemoteStatus::Paused
                            | RemoteStatus::PartiallyCompleted
                            | RemoteStatus::Completed
                    )
            }
            StatusSet::CompletionReady => {
                status.is_failure() || status.is_success() || *status == RemoteStatus::Paused
            }
        }
    }
}

/// Per-step progress marker shown alongside the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    #[default]
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::NotStarted => write!(f, "not started"),
            StepState::InProgress => write!(f, "in progress"),
            StepState::Succeeded => write!(f, "done"),
            StepState::Failed => write!(f, "failed"),
        }
    }
}
