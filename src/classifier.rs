//! Maps raw failures onto the closed set of outcomes users see.
//!
//! [`classify`] looks at structured service codes first, falls back to known
//! message substrings when no code is present, and otherwise reports
//! [`ErrorKind::Unknown`]. Nothing here retries: every retry is a fresh job
//! submitted by the user.

use std::fmt;

use serde::Serialize;

use crate::error::{PollPhase, TransformError};
use crate::remote::codes;

/// Message substring the service uses when the concurrent-job quota is hit.
const TOO_MANY_JOBS_TEXT: &str = "too many active running jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    UploadFailed,
    StartFailed,
    StartFailedTooManyJobs,
    PlanGenerationFailed,
    PollFailed,
    JobRejectedOrFailed,
    HilNoVersionsAvailable,
    HilStepNotFound,
    CancelledByUser,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::CancelledByUser)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UploadFailed => "UploadFailed",
            ErrorKind::StartFailed => "StartFailed",
            ErrorKind::StartFailedTooManyJobs => "StartFailedTooManyJobs",
            ErrorKind::PlanGenerationFailed => "PlanGenerationFailed",
            ErrorKind::PollFailed => "PollFailed",
            ErrorKind::JobRejectedOrFailed => "JobRejectedOrFailed",
            ErrorKind::HilNoVersionsAvailable => "HilNoVersionsAvailable",
            ErrorKind::HilStepNotFound => "HilStepNotFound",
            ErrorKind::CancelledByUser => "CancelledByUser",
            ErrorKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// A classified failure: what to log and what to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Technical description for logs.
    pub log_message: String,
    /// Short notification text.
    pub user_message: String,
    /// Longer chat-style explanation.
    pub chat_message: String,
    pub is_retryable: bool,
}

pub fn classify(err: &TransformError) -> Classification {
    let kind = kind_of(err);
    let (user_message, chat_message) = messages::for_failure(kind, err);
    Classification {
        kind,
        log_message: format!("{kind}: {err}"),
        user_message,
        chat_message,
        is_retryable: kind.is_retryable(),
    }
}

fn kind_of(err: &TransformError) -> ErrorKind {
    match err {
        TransformError::Cancelled => ErrorKind::CancelledByUser,
        TransformError::Packaging(_) | TransformError::Upload(_) => ErrorKind::UploadFailed,
        TransformError::Start(remote) => match remote.code() {
            Some(codes::TOO_MANY_JOBS) => ErrorKind::StartFailedTooManyJobs,
            Some(_) => ErrorKind::StartFailed,
            None if mentions_too_many_jobs(&remote.to_string()) => {
                ErrorKind::StartFailedTooManyJobs
            }
            None => ErrorKind::StartFailed,
        },
        TransformError::PlanGeneration { .. }
        | TransformError::PlanFetch(_)
        | TransformError::Timeout {
            phase: PollPhase::PlanReady,
            ..
        } => ErrorKind::PlanGenerationFailed,
        TransformError::Poll(_)
        | TransformError::Timeout {
            phase: PollPhase::Completion,
            ..
        } => ErrorKind::PollFailed,
        TransformError::JobEnded { .. } | TransformError::HilCycleLimit { .. } => {
            ErrorKind::JobRejectedOrFailed
        }
        TransformError::HilNoVersionsAvailable { .. } => ErrorKind::HilNoVersionsAvailable,
        TransformError::HilStepNotFound => ErrorKind::HilStepNotFound,
        other if mentions_too_many_jobs(&other.to_string()) => ErrorKind::StartFailedTooManyJobs,
        _ => ErrorKind::Unknown,
    }
}

fn mentions_too_many_jobs(text: &str) -> bool {
    text.to_lowercase().contains(TOO_MANY_JOBS_TEXT)
}

mod messages {
    use super::ErrorKind;
    use crate::error::TransformError;

    const UPLOAD_FAILED: &str = "The project could not be uploaded.";
    const UPLOAD_FAILED_CHAT: &str = "I couldn't upload your project. Check your network connection and that the project can be read, then try again.";
    const START_FAILED: &str = "The transformation job could not be started.";
    const START_FAILED_CHAT: &str = "I couldn't start the transformation job. Try again in a few minutes.";
    const TOO_MANY_JOBS: &str = "You already have the maximum number of transformation jobs running.";
    const TOO_MANY_JOBS_CHAT: &str = "You have too many active transformation jobs. Wait for one of them to finish or stop it, then start a new transformation.";
    const PLAN_FAILED: &str = "The transformation plan could not be generated.";
    const PLAN_FAILED_CHAT: &str = "I couldn't generate a transformation plan for your project. Review the build log, fix any build errors, and try again.";
    const POLL_FAILED: &str = "Lost track of the transformation job.";
    const POLL_FAILED_CHAT: &str = "I couldn't get the status of your transformation job. It may still be running on the service.";
    const JOB_FAILED: &str = "The transformation job failed.";
    const NO_VERSIONS: &str = "No other versions of the dependency are available.";
    const STEP_NOT_FOUND: &str = "The job paused, but no step needs your input.";
    const STEP_NOT_FOUND_CHAT: &str = "The transformation paused for input, but I couldn't find the step that needs it. The job will continue without an update.";
    const CANCELLED: &str = "Transformation cancelled.";
    const CANCELLED_CHAT: &str = "The transformation was stopped. You can start a new one at any time.";
    const UNKNOWN: &str = "Something went wrong during the transformation.";
    const UNKNOWN_CHAT: &str = "Something went wrong during the transformation. Check the logs for details and try again.";

    /// Notification and chat text for a cancelled attempt.
    pub(crate) fn cancelled() -> (String, String) {
        (CANCELLED.to_string(), CANCELLED_CHAT.to_string())
    }

    pub(super) fn for_failure(kind: ErrorKind, err: &TransformError) -> (String, String) {
        let (user, chat) = match kind {
            ErrorKind::UploadFailed => (UPLOAD_FAILED, UPLOAD_FAILED_CHAT.to_string()),
            ErrorKind::StartFailed => (START_FAILED, START_FAILED_CHAT.to_string()),
            ErrorKind::StartFailedTooManyJobs => (TOO_MANY_JOBS, TOO_MANY_JOBS_CHAT.to_string()),
            ErrorKind::PlanGenerationFailed => (PLAN_FAILED, PLAN_FAILED_CHAT.to_string()),
            ErrorKind::PollFailed => (POLL_FAILED, POLL_FAILED_CHAT.to_string()),
            ErrorKind::JobRejectedOrFailed => (JOB_FAILED, job_failed_chat(err)),
            ErrorKind::HilNoVersionsAvailable => (NO_VERSIONS, no_versions_chat(err)),
            ErrorKind::HilStepNotFound => (STEP_NOT_FOUND, STEP_NOT_FOUND_CHAT.to_string()),
            ErrorKind::CancelledByUser => return cancelled(),
            ErrorKind::Unknown => (UNKNOWN, UNKNOWN_CHAT.to_string()),
        };
        (user.to_string(), chat)
    }

    fn job_failed_chat(err: &TransformError) -> String {
        match err {
            TransformError::JobEnded {
                reason: Some(reason),
                ..
            } => format!("The transformation failed: {reason}"),
            TransformError::JobEnded { status, .. } => {
                format!("The transformation ended with status {status}. Review the plan summary for details.")
            }
            TransformError::HilCycleLimit { max } => format!(
                "The transformation paused for input more than {max} times, so I stopped it. Update the project's dependencies locally and try again."
            ),
            _ => "The transformation failed.".to_string(),
        }
    }

    fn no_versions_chat(err: &TransformError) -> String {
        match err {
            TransformError::HilNoVersionsAvailable { dependency } => format!(
                "I couldn't find any other versions of {dependency}. The transformation will continue with the current version."
            ),
            _ => NO_VERSIONS.to_string(),
        }
    }
}

pub(crate) use messages::cancelled as cancelled_messages;
