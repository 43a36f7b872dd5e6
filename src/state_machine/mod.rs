mod job;
mod plan;
mod state;

pub use job::{JobId, JobOutcome, JobRequest, JobSnapshot, JobState, ProgressMarkers};
pub use plan::{
    DownloadArtifact, PlanStep, PlanStepStatus, ProgressUpdate, TransformationPlan,
    find_intervention_point,
};
pub use state::{JobStatus, RemoteStatus, StatusSet, StepState};
