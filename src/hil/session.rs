use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::TempDir;
use zip::ZipArchive;

use super::pom::{self, CodeExcerpt, VERSION_PLACEHOLDER};
use super::resolver::Dependency;
use super::versions::VersionChoice;
use crate::error::TransformError;
use crate::state_machine::JobId;

const MANIFEST_FILE: &str = "manifest.json";
const POM_FILE: &str = "pom.xml";

/// Progress of one intervention episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HilPhase {
    Collecting,
    AwaitingChoice,
    Resolved,
    Rejected,
}

impl HilPhase {
    fn can_transition_to(self, next: HilPhase) -> bool {
        matches!(
            (self, next),
            (HilPhase::Collecting, HilPhase::AwaitingChoice)
                | (HilPhase::Collecting, HilPhase::Rejected)
                | (HilPhase::AwaitingChoice, HilPhase::Resolved)
                | (HilPhase::AwaitingChoice, HilPhase::Rejected)
        )
    }
}

/// `manifest.json` inside a client-instructions artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HilManifest {
    #[serde(default)]
    pub hil_capability: Option<String>,
    pub pom_folder_name: String,
    pub pom_group_id: String,
    pub pom_artifact_id: String,
    pub source_pom_version: String,
}

impl HilManifest {
    pub fn dependency(&self) -> Dependency {
        Dependency {
            group_id: self.pom_group_id.clone(),
            artifact_id: self.pom_artifact_id.clone(),
            current_version: self.source_pom_version.clone(),
        }
    }
}

/// Scratch state for one episode. The workspace directory is removed on drop.
#[derive(Debug)]
pub struct HilSession {
    job_id: JobId,
    phase: HilPhase,
    workspace: TempDir,
    manifest: Option<HilManifest>,
    template: Option<String>,
    choice: Option<VersionChoice>,
    selection: Option<String>,
    resume_sent: bool,
}

impl HilSession {
    /// Create the episode workspace under `scratch_root`.
    pub fn open(job_id: JobId, scratch_root: &Path) -> Result<Self, TransformError> {
        let workspace = tempfile::Builder::new()
            .prefix("codemorph-hil-")
            .tempdir_in(scratch_root)?;
        Ok(Self {
            job_id,
            phase: HilPhase::Collecting,
            workspace,
            manifest: None,
            template: None,
            choice: None,
            selection: None,
            resume_sent: false,
        })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn phase(&self) -> HilPhase {
        self.phase
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    fn transition(&mut self, next: HilPhase) -> Result<(), TransformError> {
        if !self.phase.can_transition_to(next) {
            return Err(TransformError::Hil(format!(
                "cannot move intervention from {:?} to {:?}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Close the episode. Repeated calls keep the first terminal phase.
    pub fn conclude(&mut self, resolved: bool) {
        let next = if resolved {
            HilPhase::Resolved
        } else {
            HilPhase::Rejected
        };
        if self.phase.can_transition_to(next) {
            self.phase = next;
        }
    }

    /// Where the downloaded artifact is written.
    pub fn artifact_path(&self) -> PathBuf {
        self.workspace().join("artifact.zip")
    }

    pub fn dependencies_dir(&self) -> PathBuf {
        self.workspace().join("dependencies")
    }

    fn extracted_dir(&self) -> PathBuf {
        self.workspace().join("artifact")
    }

    fn manifest(&self) -> Result<&HilManifest, TransformError> {
        self.manifest
            .as_ref()
            .ok_or_else(|| TransformError::Hil("artifact has not been unpacked".into()))
    }

    /// Directory of the descriptor shipped in the artifact.
    pub fn pom_dir(&self) -> Result<PathBuf, TransformError> {
        Ok(self.extracted_dir().join(&self.manifest()?.pom_folder_name))
    }

    /// Extract the downloaded artifact and read its manifest.
    pub fn unpack(&mut self) -> Result<&HilManifest, TransformError> {
        let mut archive = ZipArchive::new(File::open(self.artifact_path())?)?;
        let target = self.extracted_dir();
        archive.extract(&target)?;

        let manifest_path = target.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(TransformError::Hil(format!(
                "artifact has no {MANIFEST_FILE}"
            )));
        }
        let manifest: HilManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;
        Ok(&*self.manifest.insert(manifest))
    }

    /// Swap the declared version for the placeholder and keep the result as
    /// the template for the final descriptor.
    pub fn prepare_template(&mut self) -> Result<CodeExcerpt, TransformError> {
        let manifest = self.manifest()?.clone();
        let pom_path = self.pom_dir()?.join(POM_FILE);
        let pom = fs::read_to_string(&pom_path).map_err(|e| {
            TransformError::Hil(format!("cannot read {}: {e}", pom_path.display()))
        })?;

        let template = pom::substitute_version(
            &pom,
            &manifest.pom_group_id,
            &manifest.pom_artifact_id,
            &manifest.source_pom_version,
            VERSION_PLACEHOLDER,
        )
        .ok_or_else(|| {
            TransformError::Hil(format!(
                "{} does not declare {}:{}:{}",
                POM_FILE,
                manifest.pom_group_id,
                manifest.pom_artifact_id,
                manifest.source_pom_version
            ))
        })?;
        fs::write(self.workspace().join("pom.template.xml"), &template)?;

        let excerpt = pom::placeholder_excerpt(&template, POM_FILE)
            .ok_or_else(|| TransformError::Hil("placeholder vanished from template".into()))?;
        self.template = Some(template);
        Ok(excerpt)
    }

    /// Record the offered versions and wait for the user.
    pub fn offer(&mut self, choice: VersionChoice) -> Result<(), TransformError> {
        self.transition(HilPhase::AwaitingChoice)?;
        self.choice = Some(choice);
        Ok(())
    }

    /// Write a fresh descriptor carrying `version` and return its directory.
    pub fn apply_selection(&mut self, version: &str) -> Result<PathBuf, TransformError> {
        let offered = self.choice.as_ref().is_some_and(|c| c.offers(version));
        if !offered {
            return Err(TransformError::Hil(format!(
                "version {version} was not offered"
            )));
        }
        let template = self
            .template
            .as_deref()
            .ok_or_else(|| TransformError::Hil("no descriptor template prepared".into()))?;
        let pom = pom::apply_version(template, version)
            .ok_or_else(|| TransformError::Hil("descriptor template has no placeholder".into()))?;

        let dir = self
            .workspace()
            .join("selected")
            .join(&self.manifest()?.pom_folder_name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(POM_FILE), pom)?;
        self.selection = Some(version.to_string());
        Ok(dir)
    }

    /// Returns `false` if a resume was already sent this episode.
    pub fn mark_resume_sent(&mut self) -> bool {
        !std::mem::replace(&mut self.resume_sent, true)
    }
}
