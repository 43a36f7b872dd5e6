//! Request and response types exchanged with the transformation service.
//!
//! Wire structs use camelCase field names, matching the service's JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state_machine::{JobId, RemoteStatus};

/// What an uploaded artifact is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "uploadArtifactType", rename_all = "PascalCase")]
pub enum UploadContext {
    /// The packaged project that a new job will transform.
    Transformation,
    /// Updated dependencies supplied for a paused job.
    #[serde(rename_all = "camelCase")]
    Dependencies { job_id: JobId },
}

/// Metadata sent alongside artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Hex-encoded SHA-256 of the artifact.
    pub sha256: String,
    pub context: UploadContext,
}

/// Reference to a completed upload, used to start a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadRef(pub String);

/// Upgrade parameters for a new job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    pub project_name: String,
    pub source_version: String,
    pub target_version: String,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: RemoteStatus,
    /// Service-supplied explanation, mostly present on failure.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub changed_files: Option<u32>,
}

impl StatusReport {
    pub fn new(status: impl Into<RemoteStatus>) -> Self {
        Self {
            status: status.into(),
            reason: None,
            changed_files: None,
        }
    }
}

/// Whether fetching the plan may have side effects on the remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFetch {
    Full,
    ReadOnly,
}

impl PlanFetch {
    pub fn side_effects(self) -> bool {
        matches!(self, PlanFetch::Full)
    }
}

/// Kind of downloadable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Files the service hands back for a human-in-the-loop step.
    ClientInstructions,
    /// Build logs from a failed remote build.
    Logs,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::ClientInstructions => "ClientInstructions",
            ArtifactKind::Logs => "Logs",
        }
    }
}

/// Decision sent when resuming a paused job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserAction {
    Completed,
    Rejected,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateUploadRequest<'a> {
    pub content_checksum_sha256: &'a str,
    pub upload_context: &'a UploadContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateUploadResponse {
    pub upload_id: String,
    pub upload_url: String,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartJobRequest<'a> {
    pub upload_id: &'a str,
    #[serde(flatten)]
    pub params: &'a StartParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResumeRequest {
    pub user_action_status: UserAction,
}

/// Error body the service sends with non-success responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default, alias = "__type")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
