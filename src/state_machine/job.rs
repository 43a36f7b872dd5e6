use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::PlanStep;
use super::state::{JobStatus, StepState};
use crate::classifier::{Classification, ErrorKind};
use crate::timer::ProgressTimer;

/// Identifier the remote service assigns when a job starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What the user asked to transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub project_path: PathBuf,
    pub project_name: String,
    pub source_version: String,
    pub target_version: String,
    /// Pre-resolved dependency directory to ship next to the sources.
    pub dependencies_dir: Option<PathBuf>,
}

impl JobRequest {
    /// Build a request, deriving the project name from the directory name.
    pub fn new(
        project_path: impl Into<PathBuf>,
        source_version: impl Into<String>,
        target_version: impl Into<String>,
    ) -> Self {
        let project_path = project_path.into();
        let project_name = project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        Self {
            project_path,
            project_name,
            source_version: source_version.into(),
            target_version: target_version.into(),
            dependencies_dir: None,
        }
    }
}

/// Coarse progress markers for the four user-visible stages of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarkers {
    pub upload_code: StepState,
    pub build_code: StepState,
    pub transform_code: StepState,
    pub return_code: StepState,
}

impl ProgressMarkers {
    /// Mark every marker that did not succeed as failed.
    pub fn fail_unfinished(&mut self) {
        for marker in [
            &mut self.upload_code,
            &mut self.build_code,
            &mut self.transform_code,
            &mut self.return_code,
        ] {
            if *marker != StepState::Succeeded {
                *marker = StepState::Failed;
            }
        }
    }
}

/// Read-only view of a job published to the progress timer and the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub job_id: Option<JobId>,
    pub project_name: String,
    pub status: JobStatus,
    pub markers: ProgressMarkers,
    pub started_at: Option<DateTime<Utc>>,
}

/// Mutable record of the single active transformation job.
///
/// Owned by the orchestrator and passed explicitly into each phase. Setters
/// are unconditional and touch only their own field; first-write-wins for the
/// failure messages is enforced by callers through [`JobState::has_failure_message`].
#[derive(Debug, Default)]
pub struct JobState {
    status: JobStatus,
    job_id: Option<JobId>,
    project_path: PathBuf,
    project_name: String,
    source_version: String,
    target_version: String,
    plan_steps: Vec<PlanStep>,
    plan_summary_path: Option<PathBuf>,
    build_log_path: Option<PathBuf>,
    failure_notification: Option<String>,
    failure_chat_message: Option<String>,
    payload_file_path: Option<PathBuf>,
    markers: ProgressMarkers,
    started_at: Option<DateTime<Utc>>,
    interval_handle: Option<ProgressTimer>,
}

impl JobState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every field back to its default. A live progress timer is dropped,
    /// which aborts it.
    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn set_job_id(&mut self, job_id: JobId) {
        self.job_id = Some(job_id);
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn set_project_path(&mut self, path: impl Into<PathBuf>) {
        self.project_path = path.into();
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn set_project_name(&mut self, name: impl Into<String>) {
        self.project_name = name.into();
    }

    pub fn source_version(&self) -> &str {
        &self.source_version
    }

    pub fn set_source_version(&mut self, version: impl Into<String>) {
        self.source_version = version.into();
    }

    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    pub fn set_target_version(&mut self, version: impl Into<String>) {
        self.target_version = version.into();
    }

    pub fn plan_steps(&self) -> &[PlanStep] {
        &self.plan_steps
    }

    /// Replace the plan wholesale.
    pub fn set_plan_steps(&mut self, steps: Vec<PlanStep>) {
        self.plan_steps = steps;
    }

    pub fn plan_summary_path(&self) -> Option<&Path> {
        self.plan_summary_path.as_deref()
    }

    pub fn set_plan_summary_path(&mut self, path: impl Into<PathBuf>) {
        self.plan_summary_path = Some(path.into());
    }

    pub fn set_build_log_path(&mut self, path: impl Into<PathBuf>) {
        self.build_log_path = Some(path.into());
    }

    pub fn failure_notification(&self) -> Option<&str> {
        self.failure_notification.as_deref()
    }

    pub fn set_failure_notification(&mut self, message: impl Into<String>) {
        self.failure_notification = Some(message.into());
    }

    pub fn failure_chat_message(&self) -> Option<&str> {
        self.failure_chat_message.as_deref()
    }

    pub fn set_failure_chat_message(&mut self, message: impl Into<String>) {
        self.failure_chat_message = Some(message.into());
    }

    /// True once any failure message has been recorded for this attempt.
    pub fn has_failure_message(&self) -> bool {
        self.failure_notification.is_some() || self.failure_chat_message.is_some()
    }

    pub fn payload_file_path(&self) -> Option<&Path> {
        self.payload_file_path.as_deref()
    }

    pub fn set_payload_file_path(&mut self, path: impl Into<PathBuf>) {
        self.payload_file_path = Some(path.into());
    }

    pub fn clear_payload_file_path(&mut self) -> Option<PathBuf> {
        self.payload_file_path.take()
    }

    pub fn markers_mut(&mut self) -> &mut ProgressMarkers {
        &mut self.markers
    }

    pub fn set_started_at(&mut self, at: DateTime<Utc>) {
        self.started_at = Some(at);
    }

    pub fn has_interval_handle(&self) -> bool {
        self.interval_handle.is_some()
    }

    pub fn set_interval_handle(&mut self, timer: ProgressTimer) {
        self.interval_handle = Some(timer);
    }

    pub fn take_interval_handle(&mut self) -> Option<ProgressTimer> {
        self.interval_handle.take()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            project_name: self.project_name.clone(),
            status: self.status,
            markers: self.markers,
            started_at: self.started_at,
        }
    }
}

/// Final result of one job attempt, captured before the state is reset.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub job_id: Option<JobId>,
    pub project_name: String,
    /// The one message shown to the user for this attempt.
    pub message: String,
    pub failure: Option<Classification>,
    pub failure_notification: Option<String>,
    pub failure_chat_message: Option<String>,
    pub plan_summary_path: Option<PathBuf>,
    pub build_log_path: Option<PathBuf>,
    pub changed_files: Option<u32>,
    pub markers: ProgressMarkers,
    pub duration_ms: i64,
}

impl JobOutcome {
    /// Capture the final values of `state`.
    pub fn from_state(
        state: &JobState,
        message: String,
        failure: Option<Classification>,
        changed_files: Option<u32>,
    ) -> Self {
        let duration_ms = state
            .started_at
            .map(|at| (Utc::now() - at).num_milliseconds())
            .unwrap_or_default();
        Self {
            status: state.status,
            job_id: state.job_id.clone(),
            project_name: state.project_name.clone(),
            message,
            failure,
            failure_notification: state.failure_notification.clone(),
            failure_chat_message: state.failure_chat_message.clone(),
            plan_summary_path: state.plan_summary_path.clone(),
            build_log_path: state.build_log_path.clone(),
            changed_files,
            markers: state.markers,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Succeeded | JobStatus::PartiallySucceeded
        )
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|c| c.kind)
    }
}
