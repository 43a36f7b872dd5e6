use std::path::Path;
use std::time::Duration;

use crate::classifier::Classification;
use crate::hil::{CodeExcerpt, VersionChoice};
use crate::state_machine::{JobId, JobOutcome, JobSnapshot, PlanStep};

/// Notifications the core sends to whatever presents a job to the user.
///
/// Every method has a no-op default so observers implement only what they
/// display. Calls arrive from the orchestrator task and from the progress
/// timer task, so implementations must be cheap and must not block.
pub trait JobEvents: Send + Sync {
    fn progress_started(&self) {}

    fn progress_tick(&self, _elapsed: Duration, _snapshot: &JobSnapshot) {}

    fn progress_stopped(&self, _elapsed: Duration) {}

    fn job_started(&self, _job_id: &JobId) {}

    fn plan_ready(&self, _steps: &[PlanStep], _summary_path: Option<&Path>) {}

    /// An intervention began; `excerpt` shows the dependency under review.
    fn hil_started(&self, _excerpt: &CodeExcerpt) {}

    /// The user must now answer through the coordinator's handle.
    fn hil_awaiting_choice(&self, _choice: &VersionChoice) {}

    fn hil_upload_complete(&self, _version: &str) {}

    fn hil_failed(&self, _failure: &Classification) {}

    fn job_finished(&self, _outcome: &JobOutcome) {}
}
