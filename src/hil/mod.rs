//! Human-in-the-loop dependency upgrades.
//!
//! When a running job pauses, the service has hit a dependency it cannot
//! upgrade on its own. [`HilCoordinator::handle_pause`] finds the failed plan
//! step, downloads its instructions, asks the user to pick a newer version,
//! builds and uploads the resulting dependency tree and lets the job resume.
//!
//! Every episode unparks the job exactly once: with `COMPLETED` after a
//! successful upload or with `REJECTED` on any failure. A failed episode does
//! not fail the job.

mod pom;
mod resolver;
mod session;
mod versions;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use pom::CodeExcerpt;
pub use resolver::{Dependency, DependencyResolver, MavenResolver, ResolveError};
use session::HilSession;
pub use versions::{DependencyVersions, VersionChoice};

use crate::classifier::{Classification, classify};
use crate::error::{TransformError, ensure_active};
use crate::events::JobEvents;
use crate::packager::{DependencyManifest, Packager};
use crate::remote::{ArtifactKind, PlanFetch, RemoteJobClient, UploadContext, UploadMetadata, UserAction};
use crate::state_machine::{JobId, find_intervention_point};

/// The user's answer to a [`VersionChoice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserChoice {
    Version(String),
    Reject,
}

/// How an episode ended. Both variants let the job keep running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HilResolution {
    Resolved { version: String },
    Rejected { failure: Classification },
}

type Slot = Arc<Mutex<Option<oneshot::Sender<UserChoice>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<oneshot::Sender<UserChoice>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Control path for answering an open intervention.
#[derive(Debug, Clone)]
pub struct HilHandle {
    slot: Slot,
}

impl HilHandle {
    pub fn is_awaiting_choice(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Answer with `version`. Returns immediately; the coordinator continues
    /// on its own task.
    pub fn submit_choice(&self, version: impl Into<String>) -> Result<(), TransformError> {
        self.deliver(UserChoice::Version(version.into()))
    }

    pub fn reject(&self) -> Result<(), TransformError> {
        self.deliver(UserChoice::Reject)
    }

    fn deliver(&self, choice: UserChoice) -> Result<(), TransformError> {
        let sender = lock(&self.slot)
            .take()
            .ok_or(TransformError::NoPendingIntervention)?;
        sender
            .send(choice)
            .map_err(|_| TransformError::NoPendingIntervention)
    }
}

pub struct HilCoordinator {
    client: Arc<dyn RemoteJobClient>,
    packager: Arc<dyn Packager>,
    resolver: Arc<dyn DependencyResolver>,
    events: Arc<dyn JobEvents>,
    /// Parent directory for per-episode workspaces.
    scratch_root: PathBuf,
    slot: Slot,
}

impl HilCoordinator {
    pub fn new(
        client: Arc<dyn RemoteJobClient>,
        packager: Arc<dyn Packager>,
        resolver: Arc<dyn DependencyResolver>,
        events: Arc<dyn JobEvents>,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            client,
            packager,
            resolver,
            events,
            scratch_root,
            slot: Slot::default(),
        }
    }

    pub fn handle(&self) -> HilHandle {
        HilHandle {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Run one intervention episode for a paused job.
    ///
    /// Only cancellation is returned as an error; every other failure is
    /// reported through [`JobEvents::hil_failed`] and yields
    /// [`HilResolution::Rejected`].
    pub async fn handle_pause(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
    ) -> Result<HilResolution, TransformError> {
        let mut session = match HilSession::open(job_id.clone(), &self.scratch_root) {
            Ok(session) => session,
            Err(err) => {
                self.decline(job_id).await;
                return Ok(self.rejected(job_id, &err));
            }
        };
        info!(%job_id, workspace = %session.workspace().display(), "job paused for input");

        let result = self.run_episode(&mut session, cancel).await;
        lock(&self.slot).take();
        debug!(%job_id, phase = ?session.phase(), "intervention episode ended");

        match result {
            Ok(version) => {
                session.conclude(true);
                info!(%job_id, %version, "intervention resolved");
                Ok(HilResolution::Resolved { version })
            }
            Err(err) => {
                session.conclude(false);
                self.unpark(&mut session).await;
                if err.is_cancelled() {
                    return Err(err);
                }
                Ok(self.rejected(job_id, &err))
            }
        }
    }

    fn rejected(&self, job_id: &JobId, err: &TransformError) -> HilResolution {
        let failure = classify(err);
        warn!(%job_id, kind = %failure.kind, error = %err, "intervention failed");
        self.events.hil_failed(&failure);
        HilResolution::Rejected { failure }
    }

    /// Let a paused job continue without an update.
    pub async fn decline(&self, job_id: &JobId) {
        match self.client.resume(job_id, UserAction::Rejected).await {
            Ok(()) => info!(%job_id, "declined intervention"),
            Err(e) => error!(%job_id, error = %e, "failed to decline intervention"),
        }
    }

    async fn unpark(&self, session: &mut HilSession) {
        if !session.mark_resume_sent() {
            debug!(job_id = %session.job_id(), "resume already sent for this episode");
            return;
        }
        self.decline(session.job_id()).await;
    }

    async fn run_episode(
        &self,
        session: &mut HilSession,
        cancel: &CancellationToken,
    ) -> Result<String, TransformError> {
        let job_id = session.job_id().clone();

        ensure_active(cancel)?;
        let plan = self
            .client
            .get_plan(&job_id, PlanFetch::ReadOnly)
            .await
            .map_err(TransformError::PlanFetch)?;
        ensure_active(cancel)?;

        let point = find_intervention_point(&plan.steps).ok_or(TransformError::HilStepNotFound)?;
        let artifact_id = point.artifact.download_artifact_id.clone();
        debug!(step = %point.step.name, update = %point.update.name, %artifact_id, "found intervention point");

        self.client
            .download_artifact(
                &job_id,
                &artifact_id,
                ArtifactKind::ClientInstructions,
                &session.artifact_path(),
            )
            .await
            .map_err(|e| TransformError::Hil(format!("failed to download {artifact_id}: {e}")))?;
        ensure_active(cancel)?;

        let dependency = session.unpack()?.dependency();
        let excerpt = session.prepare_template()?;
        self.events.hil_started(&excerpt);

        let versions = self
            .resolver
            .available_versions(&session.pom_dir()?, &dependency)
            .await?;
        if versions.is_empty() {
            return Err(TransformError::HilNoVersionsAvailable {
                dependency: dependency.to_string(),
            });
        }
        ensure_active(cancel)?;

        let choice = VersionChoice::new(dependency.clone(), versions);
        let (tx, rx) = oneshot::channel();
        *lock(&self.slot) = Some(tx);
        session.offer(choice.clone())?;
        self.events.hil_awaiting_choice(&choice);

        let answer = tokio::select! {
            answer = rx => answer.map_err(|_| TransformError::Hil("choice channel closed".into()))?,
            _ = cancel.cancelled() => return Err(TransformError::Cancelled),
        };
        let version = match answer {
            UserChoice::Version(version) => version,
            UserChoice::Reject => return Err(TransformError::HilRejectedByUser),
        };

        info!(%job_id, %dependency, %version, "applying selected version");
        let pom_dir = session.apply_selection(&version)?;
        let dependencies_dir = session.dependencies_dir();
        self.resolver
            .copy_dependencies(&pom_dir, &dependencies_dir)
            .await?;
        ensure_active(cancel)?;

        let packager = Arc::clone(&self.packager);
        let manifest = DependencyManifest {
            pom_group_id: dependency.group_id.clone(),
            pom_artifact_id: dependency.artifact_id.clone(),
            target_pom_version: version.clone(),
        };
        let artifact = tokio::task::spawn_blocking(move || {
            packager.pack_dependency_directory(&dependencies_dir, &manifest)
        })
        .await??;
        let bytes = tokio::fs::read(&artifact.path).await;
        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            warn!(path = %artifact.path.display(), error = %e, "failed to remove dependency archive");
        }
        let bytes = bytes?;
        ensure_active(cancel)?;

        let metadata = UploadMetadata {
            sha256: artifact.sha256,
            context: UploadContext::Dependencies {
                job_id: job_id.clone(),
            },
        };
        self.client
            .upload(bytes, &metadata)
            .await
            .map_err(TransformError::Upload)?;
        self.events.hil_upload_complete(&version);
        ensure_active(cancel)?;

        session.mark_resume_sent();
        self.client
            .resume(&job_id, UserAction::Completed)
            .await
            .map_err(|e| TransformError::Hil(format!("failed to resume job: {e}")))?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorKind;
    use crate::remote::RemoteError;
    use crate::test_support::{
        Call, Event, FakeClient, FakePackager, FakeResolver, RecordingEvents, Responder,
        hil_artifact_zip, plan_with_intervention,
    };

    struct Fixture {
        client: Arc<FakeClient>,
        resolver: Arc<FakeResolver>,
        events: Arc<RecordingEvents>,
        coordinator: HilCoordinator,
    }

    fn fixture(client: FakeClient, resolver: FakeResolver) -> Fixture {
        fixture_in(client, resolver, std::env::temp_dir())
    }

    fn fixture_in(client: FakeClient, resolver: FakeResolver, scratch_root: PathBuf) -> Fixture {
        let client = Arc::new(client);
        let resolver = Arc::new(resolver);
        let events = Arc::new(RecordingEvents::default());
        let coordinator = HilCoordinator::new(
            client.clone(),
            Arc::new(FakePackager::default()),
            resolver.clone(),
            events.clone(),
            scratch_root,
        );
        Fixture {
            client,
            resolver,
            events,
            coordinator,
        }
    }

    fn paused_client() -> FakeClient {
        FakeClient::new()
            .with_plan(plan_with_intervention("A1"))
            .with_artifact(hil_artifact_zip("org.example", "lib", "1.2.0"))
    }

    #[tokio::test]
    async fn resolves_with_selected_version() {
        let f = fixture(paused_client(), FakeResolver::with_versions(&["2.1.0", "3.0.0"]));
        f.events.respond(Responder::Choose(f.coordinator.handle(), "2.1.0".into()));

        let resolution = f
            .coordinator
            .handle_pause(&JobId::new("J1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            resolution,
            HilResolution::Resolved {
                version: "2.1.0".into()
            }
        );
        assert_eq!(f.client.resumes(), vec![UserAction::Completed]);
        assert!(f.client.calls().contains(&Call::GetPlan(PlanFetch::ReadOnly)));
        assert!(f.client.calls().contains(&Call::Download(
            "A1".into(),
            ArtifactKind::ClientInstructions
        )));
        assert!(f.client.calls().contains(&Call::Upload(UploadContext::Dependencies {
            job_id: JobId::new("J1")
        })));
        let poms = f.resolver.copied_poms();
        assert_eq!(poms.len(), 1);
        assert!(poms[0].contains("<version>2.1.0</version>"));
        assert_eq!(f.events.count(|e| matches!(e, Event::HilStarted)), 1);
        assert_eq!(
            f.events.count(|e| matches!(e, Event::UploadComplete(v) if v == "2.1.0")),
            1
        );
        assert!(!f.coordinator.handle().is_awaiting_choice());
    }

    async fn rejected_kind(f: &Fixture) -> ErrorKind {
        let resolution = f
            .coordinator
            .handle_pause(&JobId::new("J1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.client.resumes(), vec![UserAction::Rejected]);
        match resolution {
            HilResolution::Rejected { failure } => {
                assert_eq!(f.events.count(|e| matches!(e, Event::HilFailed(_))), 1);
                failure.kind
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_step_rejects_once() {
        let f = fixture(FakeClient::new(), FakeResolver::with_versions(&["2.1.0"]));
        assert_eq!(rejected_kind(&f).await, ErrorKind::HilStepNotFound);
    }

    #[tokio::test]
    async fn unusable_workspace_rejects_once() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("scratch");
        std::fs::write(&not_a_dir, "file").unwrap();
        let f = fixture_in(
            paused_client(),
            FakeResolver::with_versions(&["2.1.0"]),
            not_a_dir,
        );

        assert_eq!(rejected_kind(&f).await, ErrorKind::Unknown);
        assert_eq!(f.client.count(|c| matches!(c, Call::GetPlan(_))), 0);
    }

    #[tokio::test]
    async fn download_failure_rejects_once() {
        let f = fixture(
            FakeClient::new().with_plan(plan_with_intervention("A1")),
            FakeResolver::with_versions(&["2.1.0"]),
        );
        assert_eq!(rejected_kind(&f).await, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn unreadable_artifact_rejects_once() {
        let f = fixture(
            FakeClient::new()
                .with_plan(plan_with_intervention("A1"))
                .with_artifact(b"garbage".to_vec()),
            FakeResolver::with_versions(&["2.1.0"]),
        );
        assert_eq!(rejected_kind(&f).await, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn no_versions_rejects_once() {
        let f = fixture(paused_client(), FakeResolver::no_versions());
        assert_eq!(rejected_kind(&f).await, ErrorKind::HilNoVersionsAvailable);
        assert_eq!(f.events.count(|e| matches!(e, Event::AwaitingChoice(_))), 0);
    }

    #[tokio::test]
    async fn user_rejection_rejects_once() {
        let f = fixture(paused_client(), FakeResolver::with_versions(&["2.1.0"]));
        f.events.respond(Responder::Reject(f.coordinator.handle()));
        assert_eq!(rejected_kind(&f).await, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn upload_failure_rejects_once() {
        let f = fixture(
            paused_client().failing_upload(RemoteError::service(500, None, "boom")),
            FakeResolver::with_versions(&["2.1.0"]),
        );
        f.events.respond(Responder::Choose(f.coordinator.handle(), "2.1.0".into()));
        assert_eq!(rejected_kind(&f).await, ErrorKind::UploadFailed);
    }

    #[tokio::test]
    async fn failed_completion_resume_is_not_followed_by_reject() {
        let f = fixture(
            paused_client().failing_resume(RemoteError::service(500, None, "boom")),
            FakeResolver::with_versions(&["2.1.0"]),
        );
        f.events.respond(Responder::Choose(f.coordinator.handle(), "2.1.0".into()));

        let resolution = f
            .coordinator
            .handle_pause(&JobId::new("J1"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(resolution, HilResolution::Rejected { .. }));
        assert_eq!(f.client.resumes(), vec![UserAction::Completed]);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_propagates() {
        let cancel = CancellationToken::new();
        let f = fixture(paused_client(), FakeResolver::with_versions(&["2.1.0"]));
        f.events.respond(Responder::Cancel(cancel.clone()));

        let err = f
            .coordinator
            .handle_pause(&JobId::new("J1"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(f.client.resumes(), vec![UserAction::Rejected]);
        assert_eq!(f.events.count(|e| matches!(e, Event::HilFailed(_))), 0);
        assert!(!f.coordinator.handle().is_awaiting_choice());
    }

    #[test]
    fn submit_without_pending_intervention_fails() {
        let f = fixture(FakeClient::new(), FakeResolver::no_versions());
        let handle = f.coordinator.handle();
        assert!(!handle.is_awaiting_choice());
        assert!(matches!(
            handle.submit_choice("2.1.0"),
            Err(TransformError::NoPendingIntervention)
        ));
    }

    #[tokio::test]
    async fn decline_sends_rejected() {
        let f = fixture(FakeClient::new(), FakeResolver::no_versions());
        f.coordinator.decline(&JobId::new("J1")).await;
        assert_eq!(f.client.resumes(), vec![UserAction::Rejected]);
    }
}
