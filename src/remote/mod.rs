pub mod client;
pub mod error;
pub mod types;

use std::path::Path;

use async_trait::async_trait;

use crate::state_machine::{JobId, TransformationPlan};

pub use client::HttpJobClient;
pub use error::{RemoteError, codes};
pub use types::{
    ArtifactKind, PlanFetch, StartParams, StatusReport, UploadContext, UploadMetadata, UploadRef,
    UserAction,
};

/// Operations the core needs from the transformation service.
///
/// Every call is one network round trip; the orchestrator never has two of
/// them in flight for the same job.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Obtain an upload target and push the artifact to it.
    async fn upload(
        &self,
        artifact: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<UploadRef, RemoteError>;

    async fn start(&self, upload: &UploadRef, params: &StartParams) -> Result<JobId, RemoteError>;

    async fn poll(&self, job_id: &JobId) -> Result<StatusReport, RemoteError>;

    async fn get_plan(
        &self,
        job_id: &JobId,
        fetch: PlanFetch,
    ) -> Result<TransformationPlan, RemoteError>;

    /// Download an artifact into `dest` (a file path).
    async fn download_artifact(
        &self,
        job_id: &JobId,
        artifact_id: &str,
        kind: ArtifactKind,
        dest: &Path,
    ) -> Result<(), RemoteError>;

    async fn resume(&self, job_id: &JobId, decision: UserAction) -> Result<(), RemoteError>;

    async fn stop(&self, job_id: &JobId) -> Result<(), RemoteError>;
}
