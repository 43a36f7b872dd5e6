//! Scripted collaborators shared by the orchestrator and HIL tests.

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::classifier::{Classification, ErrorKind};
use crate::events::JobEvents;
use crate::hil::{
    CodeExcerpt, Dependency, DependencyResolver, DependencyVersions, HilHandle, ResolveError,
    VersionChoice,
};
use crate::packager::{
    DependencyManifest, PackOptions, PackageError, PackagedArtifact, Packager, sha256_hex,
};
use crate::remote::{
    ArtifactKind, PlanFetch, RemoteError, RemoteJobClient, StartParams, StatusReport,
    UploadContext, UploadMetadata, UploadRef, UserAction,
};
use crate::state_machine::{
    DownloadArtifact, JobId, JobOutcome, JobSnapshot, JobStatus, PlanStep, PlanStepStatus,
    ProgressUpdate, TransformationPlan,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Upload(UploadContext),
    Start,
    Poll,
    GetPlan(PlanFetch),
    Download(String, ArtifactKind),
    Resume(UserAction),
    Stop(JobId),
}

/// Remote service double. Polls replay a script and then repeat the last
/// scripted report.
#[derive(Default)]
pub struct FakeClient {
    polls: Mutex<VecDeque<Result<StatusReport, RemoteError>>>,
    last_poll: Mutex<Option<StatusReport>>,
    start_error: Mutex<Option<RemoteError>>,
    upload_error: Mutex<Option<RemoteError>>,
    resume_error: Mutex<Option<RemoteError>>,
    plan: Mutex<TransformationPlan>,
    artifact: Mutex<Option<Vec<u8>>>,
    build_log: Mutex<Option<String>>,
    cancel_on_start: Mutex<Option<CancellationToken>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        lock(&self.polls).extend(statuses.iter().map(|s| Ok(StatusReport::new(*s))));
        self
    }

    pub fn with_report(self, report: StatusReport) -> Self {
        lock(&self.polls).push_back(Ok(report));
        self
    }

    pub fn with_poll_error(self, err: RemoteError) -> Self {
        lock(&self.polls).push_back(Err(err));
        self
    }

    pub fn with_plan(self, plan: TransformationPlan) -> Self {
        *lock(&self.plan) = plan;
        self
    }

    pub fn with_artifact(self, bytes: Vec<u8>) -> Self {
        *lock(&self.artifact) = Some(bytes);
        self
    }

    pub fn with_build_log(self, log: &str) -> Self {
        *lock(&self.build_log) = Some(log.to_string());
        self
    }

    pub fn failing_start(self, err: RemoteError) -> Self {
        *lock(&self.start_error) = Some(err);
        self
    }

    pub fn failing_upload(self, err: RemoteError) -> Self {
        *lock(&self.upload_error) = Some(err);
        self
    }

    pub fn failing_resume(self, err: RemoteError) -> Self {
        *lock(&self.resume_error) = Some(err);
        self
    }

    pub fn cancelling_on_start(self, cancel: CancellationToken) -> Self {
        *lock(&self.cancel_on_start) = Some(cancel);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    pub fn resumes(&self) -> Vec<UserAction> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                Call::Resume(action) => Some(*action),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl RemoteJobClient for FakeClient {
    async fn upload(
        &self,
        _artifact: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<UploadRef, RemoteError> {
        self.record(Call::Upload(metadata.context.clone()));
        match lock(&self.upload_error).take() {
            Some(err) => Err(err),
            None => Ok(UploadRef("U1".into())),
        }
    }

    async fn start(&self, _upload: &UploadRef, _params: &StartParams) -> Result<JobId, RemoteError> {
        self.record(Call::Start);
        if let Some(cancel) = lock(&self.cancel_on_start).take() {
            cancel.cancel();
        }
        match lock(&self.start_error).take() {
            Some(err) => Err(err),
            None => Ok(JobId::new("J1")),
        }
    }

    async fn poll(&self, _job_id: &JobId) -> Result<StatusReport, RemoteError> {
        self.record(Call::Poll);
        let next = lock(&self.polls).pop_front();
        match next {
            Some(Ok(report)) => {
                *lock(&self.last_poll) = Some(report.clone());
                Ok(report)
            }
            Some(Err(err)) => Err(err),
            None => lock(&self.last_poll)
                .clone()
                .ok_or_else(|| RemoteError::Protocol("no scripted status".into())),
        }
    }

    async fn get_plan(
        &self,
        _job_id: &JobId,
        fetch: PlanFetch,
    ) -> Result<TransformationPlan, RemoteError> {
        self.record(Call::GetPlan(fetch));
        Ok(lock(&self.plan).clone())
    }

    async fn download_artifact(
        &self,
        _job_id: &JobId,
        artifact_id: &str,
        kind: ArtifactKind,
        dest: &Path,
    ) -> Result<(), RemoteError> {
        self.record(Call::Download(artifact_id.to_string(), kind));
        let bytes = match kind {
            ArtifactKind::ClientInstructions => lock(&self.artifact).clone(),
            ArtifactKind::Logs => lock(&self.build_log).clone().map(String::into_bytes),
        };
        let bytes = bytes.ok_or_else(|| RemoteError::service(404, None, "no such artifact"))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, bytes)?;
        Ok(())
    }

    async fn resume(&self, _job_id: &JobId, decision: UserAction) -> Result<(), RemoteError> {
        self.record(Call::Resume(decision));
        match lock(&self.resume_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stop(&self, job_id: &JobId) -> Result<(), RemoteError> {
        self.record(Call::Stop(job_id.clone()));
        Ok(())
    }
}

/// Writes small placeholder archives into its own temp dir.
pub struct FakePackager {
    dir: TempDir,
    fail: bool,
    created: Mutex<Vec<PathBuf>>,
}

impl Default for FakePackager {
    fn default() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            fail: false,
            created: Mutex::new(Vec::new()),
        }
    }
}

impl FakePackager {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<PathBuf> {
        lock(&self.created).clone()
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PackagedArtifact, PackageError> {
        let mut created = lock(&self.created);
        let path = self.dir.path().join(format!("{name}-{}.zip", created.len()));
        std::fs::write(&path, bytes)?;
        created.push(path.clone());
        Ok(PackagedArtifact {
            path,
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(bytes),
        })
    }
}

impl Packager for FakePackager {
    fn pack(
        &self,
        project_path: &Path,
        _options: &PackOptions,
    ) -> Result<PackagedArtifact, PackageError> {
        if self.fail {
            return Err(PackageError::MissingProject(project_path.to_path_buf()));
        }
        self.write("project", b"project")
    }

    fn pack_dependency_directory(
        &self,
        path: &Path,
        _manifest: &DependencyManifest,
    ) -> Result<PackagedArtifact, PackageError> {
        if !path.is_dir() {
            return Err(PackageError::MissingProject(path.to_path_buf()));
        }
        self.write("dependencies", b"dependencies")
    }
}

#[derive(Default)]
pub struct FakeResolver {
    versions: Option<DependencyVersions>,
    copied: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn with_versions(versions: &[&str]) -> Self {
        Self {
            versions: Some(DependencyVersions {
                current: Some("1.2.0".into()),
                latest: versions.last().map(|v| v.to_string()),
                majors: versions.iter().map(|v| v.to_string()).collect(),
                ..Default::default()
            }),
            copied: Mutex::new(Vec::new()),
        }
    }

    pub fn no_versions() -> Self {
        Self::default()
    }

    /// Descriptor contents seen by each `copy_dependencies` call.
    pub fn copied_poms(&self) -> Vec<String> {
        lock(&self.copied).clone()
    }
}

#[async_trait]
impl DependencyResolver for FakeResolver {
    async fn available_versions(
        &self,
        _project_dir: &Path,
        dependency: &Dependency,
    ) -> Result<DependencyVersions, ResolveError> {
        self.versions
            .clone()
            .ok_or_else(|| ResolveError::NoVersionsAvailable {
                dependency: dependency.to_string(),
            })
    }

    async fn copy_dependencies(
        &self,
        project_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), ResolveError> {
        let pom = std::fs::read_to_string(project_dir.join("pom.xml"))?;
        lock(&self.copied).push(pom);
        let jar_dir = output_dir.join("org/example/lib");
        std::fs::create_dir_all(&jar_dir)?;
        std::fs::write(jar_dir.join("lib.jar"), b"jar")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ProgressStarted,
    ProgressTick,
    ProgressStopped,
    JobStarted(JobId),
    PlanReady(usize),
    HilStarted,
    AwaitingChoice(VersionChoice),
    UploadComplete(String),
    HilFailed(ErrorKind),
    Finished(JobStatus),
}

/// What [`RecordingEvents`] does when a choice is requested.
#[derive(Clone)]
pub enum Responder {
    Choose(HilHandle, String),
    Reject(HilHandle),
    Cancel(CancellationToken),
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
    responder: Mutex<Option<Responder>>,
}

impl RecordingEvents {
    pub fn respond(&self, responder: Responder) {
        *lock(&self.responder) = Some(responder);
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: Event) {
        lock(&self.events).push(event);
    }
}

impl JobEvents for RecordingEvents {
    fn progress_started(&self) {
        self.push(Event::ProgressStarted);
    }

    fn progress_tick(&self, _elapsed: Duration, _snapshot: &JobSnapshot) {
        self.push(Event::ProgressTick);
    }

    fn progress_stopped(&self, _elapsed: Duration) {
        self.push(Event::ProgressStopped);
    }

    fn job_started(&self, job_id: &JobId) {
        self.push(Event::JobStarted(job_id.clone()));
    }

    fn plan_ready(&self, steps: &[PlanStep], _summary_path: Option<&Path>) {
        self.push(Event::PlanReady(steps.len()));
    }

    fn hil_started(&self, _excerpt: &CodeExcerpt) {
        self.push(Event::HilStarted);
    }

    fn hil_awaiting_choice(&self, choice: &VersionChoice) {
        self.push(Event::AwaitingChoice(choice.clone()));
        let responder = lock(&self.responder).clone();
        match responder {
            Some(Responder::Choose(handle, version)) => handle.submit_choice(version).unwrap(),
            Some(Responder::Reject(handle)) => handle.reject().unwrap(),
            Some(Responder::Cancel(cancel)) => cancel.cancel(),
            None => {}
        }
    }

    fn hil_upload_complete(&self, version: &str) {
        self.push(Event::UploadComplete(version.to_string()));
    }

    fn hil_failed(&self, failure: &Classification) {
        self.push(Event::HilFailed(failure.kind));
    }

    fn job_finished(&self, outcome: &JobOutcome) {
        self.push(Event::Finished(outcome.status));
    }
}

/// Client-instructions archive naming `group:artifact:version` in
/// `lib-module/pom.xml`.
pub fn hil_artifact_zip(group: &str, artifact: &str, version: &str) -> Vec<u8> {
    let manifest = serde_json::json!({
        "hilCapability": "HIL_1pDependency_VersionUpgrade",
        "pomFolderName": "lib-module",
        "pomGroupId": group,
        "pomArtifactId": artifact,
        "sourcePomVersion": version,
    });
    let pom = format!(
        "<project>\n  <dependencies>\n    <dependency>\n      <groupId>{group}</groupId>\n      <artifactId>{artifact}</artifactId>\n      <version>{version}</version>\n    </dependency>\n  </dependencies>\n</project>\n"
    );

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.start_file("manifest.json", options).unwrap();
    zip.write_all(manifest.to_string().as_bytes()).unwrap();
    zip.start_file("lib-module/pom.xml", options).unwrap();
    zip.write_all(pom.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

/// A plan whose build step failed on a dependency and exposes `artifact_id`.
pub fn plan_with_intervention(artifact_id: &str) -> TransformationPlan {
    TransformationPlan {
        steps: vec![
            PlanStep {
                id: "1".into(),
                name: "Building Code".into(),
                description: String::new(),
                status: PlanStepStatus::Completed,
                progress_updates: Vec::new(),
            },
            PlanStep {
                id: "2".into(),
                name: "Upgrading Dependencies".into(),
                description: String::new(),
                status: PlanStepStatus::Paused,
                progress_updates: vec![ProgressUpdate {
                    name: "Update org.example:lib".into(),
                    description: None,
                    status: PlanStepStatus::Failed,
                    download_artifacts: vec![DownloadArtifact {
                        download_artifact_id: artifact_id.into(),
                        download_artifact_type: "BuiltJars".into(),
                    }],
                }],
            },
        ],
        rendered_summary: "# Transformation plan\n\n1. Building Code\n2. Upgrading Dependencies\n"
            .into(),
    }
}
