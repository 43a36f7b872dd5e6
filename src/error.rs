use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::hil::ResolveError;
use crate::packager::PackageError;
use crate::remote::RemoteError;
use crate::state_machine::{JobStatus, RemoteStatus};

/// Which polling loop ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    PlanReady,
    Completion,
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollPhase::PlanReady => write!(f, "waiting for the transformation plan"),
            PollPhase::Completion => write!(f, "waiting for the transformation to finish"),
        }
    }
}

/// Every way a job attempt can fail.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to package project: {0}")]
    Packaging(#[from] PackageError),

    #[error("failed to upload artifact: {0}")]
    Upload(#[source] RemoteError),

    #[error("failed to start transformation job: {0}")]
    Start(#[source] RemoteError),

    #[error("plan generation ended with status {status}")]
    PlanGeneration {
        status: RemoteStatus,
        reason: Option<String>,
    },

    #[error("failed to fetch transformation plan: {0}")]
    PlanFetch(#[source] RemoteError),

    #[error("failed to poll job status: {0}")]
    Poll(#[source] RemoteError),

    #[error("timed out {phase} after {}s", .elapsed.as_secs())]
    Timeout { phase: PollPhase, elapsed: Duration },

    #[error("transformation job ended with status {status}")]
    JobEnded {
        status: RemoteStatus,
        reason: Option<String>,
    },

    #[error("no plan step exposes an artifact for the paused job")]
    HilStepNotFound,

    #[error("no other versions of {dependency} are available")]
    HilNoVersionsAvailable { dependency: String },

    #[error("dependency resolution failed: {0}")]
    Resolve(#[source] ResolveError),

    #[error("intervention failed: {0}")]
    Hil(String),

    #[error("intervention rejected by user")]
    HilRejectedByUser,

    #[error("no intervention is waiting for a choice")]
    NoPendingIntervention,

    #[error("job paused more than {max} times")]
    HilCycleLimit { max: u32 },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("stopped by user")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl TransformError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransformError::Cancelled)
    }

    /// The remote error underneath, when one caused this failure.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            TransformError::Upload(e)
            | TransformError::Start(e)
            | TransformError::PlanFetch(e)
            | TransformError::Poll(e) => Some(e),
            _ => None,
        }
    }
}

/// Fails with [`TransformError::Cancelled`] once the user asked to stop.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<(), TransformError> {
    if cancel.is_cancelled() {
        Err(TransformError::Cancelled)
    } else {
        Ok(())
    }
}

impl From<ResolveError> for TransformError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoVersionsAvailable { dependency } => {
                TransformError::HilNoVersionsAvailable { dependency }
            }
            other => TransformError::Resolve(other),
        }
    }
}
