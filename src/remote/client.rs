use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::RemoteJobClient;
use super::error::RemoteError;
use super::types::{
    ArtifactKind, CreateUploadRequest, CreateUploadResponse, ErrorBody, PlanFetch, ResumeRequest,
    StartJobRequest, StartJobResponse, StartParams, StatusReport, UploadMetadata, UploadRef,
    UserAction,
};
use crate::state_machine::{JobId, TransformationPlan};

/// [`RemoteJobClient`] backed by the service's JSON-over-HTTP API.
pub struct HttpJobClient {
    api_token: String,
    client: Client,
    base_url: String,
}

impl HttpJobClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            api_token: api_token.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        if self.api_token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_token)
        }
    }

    /// Turn non-success responses into [`RemoteError`]s.
    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        let text = match response.text().await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code, body.message.unwrap_or_else(|| text.clone())),
            Err(_) => (None, text),
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::RateLimited {
                retry_after_ms,
                code,
                message,
            });
        }
        Err(RemoteError::Service {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl RemoteJobClient for HttpJobClient {
    async fn upload(
        &self,
        artifact: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<UploadRef, RemoteError> {
        let target = self
            .authorized(self.client.post(self.url("uploads")))
            .json(&CreateUploadRequest {
                content_checksum_sha256: &metadata.sha256,
                upload_context: &metadata.context,
            })
            .send()
            .await?;
        let target: CreateUploadResponse = Self::check(target).await?.json().await?;
        debug!(upload_id = %target.upload_id, bytes = artifact.len(), "pushing artifact");

        // The upload URL is pre-authorised; the bearer token stays with the API.
        let mut put = self
            .client
            .put(&target.upload_url)
            .header("content-type", "application/zip");
        for (name, value) in &target.request_headers {
            put = put.header(name.as_str(), value.as_str());
        }
        Self::check(put.body(artifact).send().await?).await?;

        Ok(UploadRef(target.upload_id))
    }

    async fn start(&self, upload: &UploadRef, params: &StartParams) -> Result<JobId, RemoteError> {
        let response = self
            .authorized(self.client.post(self.url("jobs")))
            .json(&StartJobRequest {
                upload_id: &upload.0,
                params,
            })
            .send()
            .await?;
        let body: StartJobResponse = Self::check(response).await?.json().await?;
        if body.job_id.as_str().is_empty() {
            return Err(RemoteError::Protocol("start returned an empty job id".into()));
        }
        Ok(body.job_id)
    }

    async fn poll(&self, job_id: &JobId) -> Result<StatusReport, RemoteError> {
        let response = self
            .authorized(self.client.get(self.url(&format!("jobs/{job_id}"))))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_plan(
        &self,
        job_id: &JobId,
        fetch: PlanFetch,
    ) -> Result<TransformationPlan, RemoteError> {
        let url = self.url(&format!(
            "jobs/{job_id}/plan?sideEffects={}",
            fetch.side_effects()
        ));
        let response = self.authorized(self.client.get(url)).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn download_artifact(
        &self,
        job_id: &JobId,
        artifact_id: &str,
        kind: ArtifactKind,
        dest: &Path,
    ) -> Result<(), RemoteError> {
        let url = self.url(&format!(
            "jobs/{job_id}/artifacts/{artifact_id}?type={}",
            kind.as_str()
        ));
        let response = self.authorized(self.client.get(url)).send().await?;
        let bytes = Self::check(response).await?.bytes().await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    async fn resume(&self, job_id: &JobId, decision: UserAction) -> Result<(), RemoteError> {
        let response = self
            .authorized(self.client.post(self.url(&format!("jobs/{job_id}/resume"))))
            .json(&ResumeRequest {
                user_action_status: decision,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn stop(&self, job_id: &JobId) -> Result<(), RemoteError> {
        let response = self
            .authorized(self.client.post(self.url(&format!("jobs/{job_id}/stop"))))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
