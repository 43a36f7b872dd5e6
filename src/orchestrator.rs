use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classification, cancelled_messages, classify};
use crate::error::{PollPhase, TransformError, ensure_active};
use crate::events::JobEvents;
use crate::hil::{DependencyResolver, HilCoordinator, HilHandle, HilResolution};
use crate::history::JobHistory;
use crate::packager::{PackOptions, PackageError, Packager};
use crate::remote::{
    ArtifactKind, PlanFetch, RemoteError, RemoteJobClient, StartParams, StatusReport, UploadContext,
    UploadMetadata, UploadRef,
};
use crate::state_machine::{
    JobId, JobOutcome, JobRequest, JobSnapshot, JobState, JobStatus, RemoteStatus, StatusSet,
    StepState,
};
use crate::timer::ProgressTimer;

/// Artifact id the service uses for the build log of a failed plan phase.
const BUILD_LOG_ARTIFACT: &str = "build-logs";
const TELEMETRY: &str = "codemorph::telemetry";

/// Timing knobs for one job attempt.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    /// Budget for reaching a plan-ready status.
    pub plan_timeout: Duration,
    /// Budget for each completion-polling pass.
    pub job_timeout: Duration,
    /// Pause between starting the job and the first poll.
    pub start_delay: Duration,
    pub progress_interval: Duration,
    /// Interventions allowed per job before a pause fails it.
    pub max_hil_cycles: u32,
    /// Plan summaries and build logs land in `<output_dir>/<job id>/`.
    pub output_dir: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            plan_timeout: Duration::from_secs(60 * 60),
            job_timeout: Duration::from_secs(8 * 60 * 60),
            start_delay: Duration::from_secs(2),
            progress_interval: Duration::from_secs(1),
            max_hil_cycles: 3,
            output_dir: PathBuf::from(".codemorph"),
        }
    }
}

/// Drives one transformation job from upload to a terminal status.
pub struct JobOrchestrator {
    client: Arc<dyn RemoteJobClient>,
    packager: Arc<dyn Packager>,
    hil: HilCoordinator,
    events: Arc<dyn JobEvents>,
    history: JobHistory,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    pub fn new(
        client: Arc<dyn RemoteJobClient>,
        packager: Arc<dyn Packager>,
        resolver: Arc<dyn DependencyResolver>,
        events: Arc<dyn JobEvents>,
        settings: OrchestratorSettings,
    ) -> Self {
        let hil = HilCoordinator::new(
            Arc::clone(&client),
            Arc::clone(&packager),
            resolver,
            Arc::clone(&events),
            std::env::temp_dir(),
        );
        Self {
            client,
            packager,
            hil,
            events,
            history: JobHistory::new(),
            settings,
        }
    }

    /// Handle for answering interventions while [`run_job`](Self::run_job) is running.
    pub fn hil_handle(&self) -> HilHandle {
        self.hil.handle()
    }

    pub fn history(&self) -> &JobHistory {
        &self.history
    }

    /// Run one job attempt to a terminal status.
    ///
    /// Never fails: every error is classified into the returned outcome.
    /// `state` is reset to defaults before returning.
    pub async fn run_job(
        &self,
        state: &mut JobState,
        request: JobRequest,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let snapshots = self.enter_running_state(state, &request);
        let result = self.run_phases(state, &request, cancel, &snapshots).await;
        let (failure, changed_files) = self.finalize(state, result, cancel).await;
        self.cleanup(state, failure, changed_files).await
    }

    fn enter_running_state(
        &self,
        state: &mut JobState,
        request: &JobRequest,
    ) -> watch::Sender<JobSnapshot> {
        state.reset_to_defaults();
        state.set_project_path(&request.project_path);
        state.set_project_name(&request.project_name);
        state.set_source_version(&request.source_version);
        state.set_target_version(&request.target_version);
        state.set_started_at(Utc::now());
        state.set_status(JobStatus::Running);

        let (tx, rx) = watch::channel(state.snapshot());
        state.set_interval_handle(ProgressTimer::start(
            self.settings.progress_interval,
            Arc::clone(&self.events),
            rx,
            self.history.clone(),
        ));
        info!(
            project = %request.project_name,
            source = %request.source_version,
            target = %request.target_version,
            "starting transformation"
        );
        tx
    }

    async fn run_phases(
        &self,
        state: &mut JobState,
        request: &JobRequest,
        cancel: &CancellationToken,
        snapshots: &watch::Sender<JobSnapshot>,
    ) -> Result<StatusReport, TransformError> {
        // UPLOAD: package and push the project
        let upload = self.upload_phase(state, request, cancel, snapshots).await;
        let upload = self.at_boundary(state, upload, cancel)?;

        // START: create the remote job
        let job_id = self.start_phase(state, request, &upload, cancel, snapshots).await;
        let job_id = self.at_boundary(state, job_id, cancel)?;

        // PLAN: wait for the plan and show it
        let plan = self.plan_phase(state, &job_id, cancel, snapshots).await;
        self.at_boundary(state, plan, cancel)?;

        // TRANSFORM: wait for completion, handling interventions
        let report = self.completion_phase(state, &job_id, cancel, snapshots).await;
        self.at_boundary(state, report, cancel)
    }

    /// Record the first failure message as the error leaves a phase.
    ///
    /// Once the token is set the error belongs to the cancellation path and
    /// is left unclassified.
    fn at_boundary<T>(
        &self,
        state: &mut JobState,
        result: Result<T, TransformError>,
        cancel: &CancellationToken,
    ) -> Result<T, TransformError> {
        result.map_err(|err| {
            if !err.is_cancelled() && !cancel.is_cancelled() && !state.has_failure_message() {
                let failure = classify(&err);
                state.set_failure_notification(failure.user_message);
                state.set_failure_chat_message(failure.chat_message);
            }
            err
        })
    }

    async fn upload_phase(
        &self,
        state: &mut JobState,
        request: &JobRequest,
        cancel: &CancellationToken,
        snapshots: &watch::Sender<JobSnapshot>,
    ) -> Result<UploadRef, TransformError> {
        ensure_active(cancel)?;
        state.markers_mut().upload_code = StepState::InProgress;
        publish(state, snapshots);

        let packager = Arc::clone(&self.packager);
        let project = request.project_path.clone();
        let options = PackOptions {
            dependencies_dir: request.dependencies_dir.clone(),
            hil_capable: true,
        };
        let artifact = tokio::task::spawn_blocking(move || packager.pack(&project, &options))
            .await??;
        state.set_payload_file_path(&artifact.path);
        info!(path = %artifact.path.display(), size_bytes = artifact.size_bytes, "project packaged");

        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| TransformError::Packaging(PackageError::Io(e)))?;
        ensure_active(cancel)?;
        let metadata = UploadMetadata {
            sha256: artifact.sha256,
            context: UploadContext::Transformation,
        };
        let upload = self
            .client
            .upload(bytes, &metadata)
            .await
            .map_err(TransformError::Upload)?;
        ensure_active(cancel)?;

        if let Some(payload) = state.clear_payload_file_path() {
            remove_payload(&payload).await;
        }
        state.markers_mut().upload_code = StepState::Succeeded;
        publish(state, snapshots);
        Ok(upload)
    }

    async fn start_phase(
        &self,
        state: &mut JobState,
        request: &JobRequest,
        upload: &UploadRef,
        cancel: &CancellationToken,
        snapshots: &watch::Sender<JobSnapshot>,
    ) -> Result<JobId, TransformError> {
        ensure_active(cancel)?;
        let params = StartParams {
            project_name: request.project_name.clone(),
            source_version: request.source_version.clone(),
            target_version: request.target_version.clone(),
        };
        let job_id = self
            .client
            .start(upload, &params)
            .await
            .map_err(TransformError::Start)?;

        state.set_job_id(job_id.clone());
        publish(state, snapshots);
        info!(%job_id, "transformation job started");
        self.events.job_started(&job_id);

        ensure_active(cancel)?;
        pause(self.settings.start_delay, cancel).await?;
        Ok(job_id)
    }

    async fn plan_phase(
        &self,
        state: &mut JobState,
        job_id: &JobId,
        cancel: &CancellationToken,
        snapshots: &watch::Sender<JobSnapshot>,
    ) -> Result<(), TransformError> {
        ensure_active(cancel)?;
        state.markers_mut().build_code = StepState::InProgress;
        publish(state, snapshots);

        let polled = self
            .poll_until(
                job_id,
                StatusSet::PlanReady,
                self.settings.plan_timeout,
                PollPhase::PlanReady,
                cancel,
            )
            .await;
        let report = match polled {
            Ok(report) => report,
            Err(err) => {
                if !err.is_cancelled() {
                    self.fetch_build_log(state, job_id).await;
                }
                return Err(err);
            }
        };
        if report.status.is_failure() {
            self.fetch_build_log(state, job_id).await;
            return Err(TransformError::PlanGeneration {
                status: report.status,
                reason: report.reason,
            });
        }

        ensure_active(cancel)?;
        let plan = self
            .client
            .get_plan(job_id, PlanFetch::Full)
            .await
            .map_err(TransformError::PlanFetch)?;
        ensure_active(cancel)?;

        if let Some(path) = self.write_summary(job_id, &plan.rendered_summary).await {
            state.set_plan_summary_path(path);
        }
        info!(%job_id, steps = plan.steps.len(), "transformation plan ready");
        state.set_plan_steps(plan.steps);
        state.markers_mut().build_code = StepState::Succeeded;
        state.markers_mut().transform_code = StepState::InProgress;
        publish(state, snapshots);
        self.events
            .plan_ready(state.plan_steps(), state.plan_summary_path());
        Ok(())
    }

    async fn completion_phase(
        &self,
        state: &mut JobState,
        job_id: &JobId,
        cancel: &CancellationToken,
        snapshots: &watch::Sender<JobSnapshot>,
    ) -> Result<StatusReport, TransformError> {
        let mut interventions = 0u32;
        loop {
            ensure_active(cancel)?;
            let report = self
                .poll_until(
                    job_id,
                    StatusSet::CompletionReady,
                    self.settings.job_timeout,
                    PollPhase::Completion,
                    cancel,
                )
                .await?;
            if report.status != RemoteStatus::Paused {
                return Ok(report);
            }

            interventions += 1;
            if interventions > self.settings.max_hil_cycles {
                warn!(%job_id, max = self.settings.max_hil_cycles, "too many interventions");
                self.hil.decline(job_id).await;
                return Err(TransformError::HilCycleLimit {
                    max: self.settings.max_hil_cycles,
                });
            }

            transition(state, JobStatus::WaitingForUserInput)?;
            publish(state, snapshots);
            let resolution = self.hil.handle_pause(job_id, cancel).await;
            transition(state, JobStatus::Running)?;
            publish(state, snapshots);

            match resolution? {
                HilResolution::Resolved { version } => {
                    debug!(%job_id, %version, "resuming completion polling");
                }
                HilResolution::Rejected { failure } => {
                    debug!(%job_id, kind = %failure.kind, "continuing without intervention");
                }
            }
        }
    }

    /// Poll until the status is in `stop_on`, the budget runs out or the
    /// user cancels.
    async fn poll_until(
        &self,
        job_id: &JobId,
        stop_on: StatusSet,
        budget: Duration,
        phase: PollPhase,
        cancel: &CancellationToken,
    ) -> Result<StatusReport, TransformError> {
        let started = Instant::now();
        loop {
            ensure_active(cancel)?;
            let report = self
                .client
                .poll(job_id)
                .await
                .map_err(TransformError::Poll)?;
            ensure_active(cancel)?;
            debug!(%job_id, status = %report.status, "polled job");

            if stop_on.contains(&report.status) {
                return Ok(report);
            }
            let elapsed = started.elapsed();
            if elapsed >= budget {
                return Err(TransformError::Timeout { phase, elapsed });
            }
            pause(self.settings.poll_interval, cancel).await?;
        }
    }

    fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.settings.output_dir.join(job_id.as_str())
    }

    async fn write_summary(&self, job_id: &JobId, summary: &str) -> Option<PathBuf> {
        let dir = self.job_dir(job_id);
        let path = dir.join("plan.md");
        let written = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, summary).await
        };
        match written.await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write plan summary");
                None
            }
        }
    }

    async fn fetch_build_log(&self, state: &mut JobState, job_id: &JobId) {
        let dest = self.job_dir(job_id).join("logs").join("build-log.txt");
        match self
            .client
            .download_artifact(job_id, BUILD_LOG_ARTIFACT, ArtifactKind::Logs, &dest)
            .await
        {
            Ok(()) => {
                info!(%job_id, path = %dest.display(), "build log saved");
                state.set_build_log_path(dest);
            }
            Err(e) => warn!(%job_id, error = %e, "failed to fetch build log"),
        }
    }

    /// Settle the terminal status. Returns the failure classification and
    /// the changed-file count reported by the service.
    async fn finalize(
        &self,
        state: &mut JobState,
        result: Result<StatusReport, TransformError>,
        cancel: &CancellationToken,
    ) -> (Option<Classification>, Option<u32>) {
        let result = result.and_then(|report| {
            if report.status.is_success() {
                Ok(report)
            } else {
                self.at_boundary(
                    state,
                    Err(TransformError::JobEnded {
                        status: report.status,
                        reason: report.reason,
                    }),
                    cancel,
                )
            }
        });

        match result {
            Ok(report) => {
                let markers = state.markers_mut();
                markers.transform_code = StepState::Succeeded;
                markers.return_code = StepState::Succeeded;
                let status = if report.status == RemoteStatus::PartiallyCompleted {
                    JobStatus::PartiallySucceeded
                } else {
                    JobStatus::Succeeded
                };
                conclude(state, status);
                (None, report.changed_files)
            }
            Err(err) if err.is_cancelled() || cancel.is_cancelled() => {
                self.on_cancelled(state).await;
                (None, None)
            }
            Err(err) => {
                let failure = classify(&err);
                error!(
                    job_id = ?state.job_id(),
                    kind = %failure.kind,
                    remote_code = ?err.remote().and_then(RemoteError::code),
                    error = %err,
                    "transformation failed"
                );
                conclude(state, JobStatus::Failed);
                (Some(failure), None)
            }
        }
    }

    async fn on_cancelled(&self, state: &mut JobState) {
        info!(job_id = ?state.job_id(), "transformation stopped by user");
        if !state.has_failure_message() {
            let (notification, chat) = cancelled_messages();
            state.set_failure_notification(notification);
            state.set_failure_chat_message(chat);
        }
        if let Some(job_id) = state.job_id().cloned() {
            if let Err(e) = self.client.stop(&job_id).await {
                warn!(%job_id, error = %e, "failed to stop remote job");
            }
        }
        conclude(state, JobStatus::Cancelled);
    }

    async fn cleanup(
        &self,
        state: &mut JobState,
        failure: Option<Classification>,
        changed_files: Option<u32>,
    ) -> JobOutcome {
        let elapsed = state
            .take_interval_handle()
            .map(ProgressTimer::stop)
            .unwrap_or_default();
        state.markers_mut().fail_unfinished();
        if let Some(payload) = state.clear_payload_file_path() {
            remove_payload(&payload).await;
        }

        let message = compose_message(state, changed_files);
        let outcome = JobOutcome::from_state(state, message, failure, changed_files);
        self.history.update(&state.snapshot(), elapsed);

        info!(
            target: TELEMETRY,
            job_id = ?outcome.job_id,
            project = %outcome.project_name,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            failure_kind = ?outcome.failure_kind(),
            changed_files = ?outcome.changed_files,
            "job finished"
        );
        self.events.job_finished(&outcome);
        state.reset_to_defaults();
        outcome
    }
}

fn publish(state: &JobState, snapshots: &watch::Sender<JobSnapshot>) {
    snapshots.send_replace(state.snapshot());
}

fn transition(state: &mut JobState, next: JobStatus) -> Result<(), TransformError> {
    let from = state.status();
    if !from.can_transition_to(next) {
        return Err(TransformError::InvalidTransition { from, to: next });
    }
    state.set_status(next);
    Ok(())
}

/// Set a terminal status even if the current one would not normally allow it.
fn conclude(state: &mut JobState, status: JobStatus) {
    let from = state.status();
    if !from.can_transition_to(status) {
        warn!(%from, to = %status, "forcing terminal status");
    }
    state.set_status(status);
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), TransformError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(TransformError::Cancelled),
    }
}

async fn remove_payload(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed payload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove payload"),
    }
}

fn compose_message(state: &JobState, changed_files: Option<u32>) -> String {
    let project = state.project_name();
    match state.status() {
        JobStatus::Succeeded => format!(
            "Transformation of {project} from {} to {} succeeded.",
            state.source_version(),
            state.target_version()
        ),
        JobStatus::PartiallySucceeded => match changed_files {
            Some(n) => format!(
                "Transformation of {project} partially succeeded: {n} file(s) changed. Review the plan summary for the steps that could not be completed."
            ),
            None => format!(
                "Transformation of {project} partially succeeded. Review the plan summary for the steps that could not be completed."
            ),
        },
        _ => state
            .failure_notification()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Transformation of {project} did not complete.")),
    }
}
