//! Project packaging.
//!
//! [`ZipPackager`] turns a project directory into the zip the service expects:
//!
//! ```text
//! manifest.json
//! sources/<project files>
//! dependencies/<optional pre-resolved dependencies>
//! ```
//!
//! Dependency updates produced during a human-in-the-loop episode are packed
//! the same way, with a manifest naming the dependency and its new version.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const SOURCES_ROOT: &str = "sources/";
const DEPENDENCIES_ROOT: &str = "dependencies/";
const MANIFEST_VERSION: &str = "1.0";
const HIL_DEPENDENCY_UPGRADE: &str = "HIL_1pDependency_VersionUpgrade";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("project directory not found: {0}")]
    MissingProject(PathBuf),

    #[error("no files to package under {0}")]
    Empty(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to write manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// A zip written to disk and ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the file.
    pub sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackOptions {
    /// Directory of already-resolved dependencies to ship with the sources.
    pub dependencies_dir: Option<PathBuf>,
    /// Advertise that the client can answer dependency-upgrade interventions.
    pub hil_capable: bool,
}

/// Names the dependency an intervention upload updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyManifest {
    pub pom_group_id: String,
    pub pom_artifact_id: String,
    pub target_pom_version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectManifest<'a> {
    sources_root: &'a str,
    dependencies_root: &'a str,
    version: &'a str,
    hil_capabilities: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DependencyUploadManifest<'a> {
    dependencies_root: &'a str,
    #[serde(flatten)]
    dependency: &'a DependencyManifest,
}

/// Builds uploadable artifacts.
pub trait Packager: Send + Sync {
    fn pack(&self, project_path: &Path, options: &PackOptions)
    -> Result<PackagedArtifact, PackageError>;

    fn pack_dependency_directory(
        &self,
        path: &Path,
        manifest: &DependencyManifest,
    ) -> Result<PackagedArtifact, PackageError>;
}

/// Writes zips into `output_dir` (the system temp dir by default).
#[derive(Debug, Clone)]
pub struct ZipPackager {
    output_dir: PathBuf,
}

impl Default for ZipPackager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ZipPackager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn next_archive_path(&self, prefix: &str) -> PathBuf {
        self.output_dir
            .join(format!("codemorph-{prefix}-{}.zip", Uuid::new_v4()))
    }

    /// Stage an archive in a temp file and move it into place once `fill`
    /// succeeds. On any error the staged file is removed.
    fn write_archive(
        &self,
        prefix: &str,
        fill: impl FnOnce(&mut ZipWriter<NamedTempFile>, SimpleFileOptions) -> Result<(), PackageError>,
    ) -> Result<PackagedArtifact, PackageError> {
        fs::create_dir_all(&self.output_dir)?;
        let mut zip = ZipWriter::new(NamedTempFile::new_in(&self.output_dir)?);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        fill(&mut zip, options)?;
        let staged = zip.finish()?;

        let bytes = fs::read(staged.path())?;
        let path = self.next_archive_path(prefix);
        staged.persist(&path).map_err(|e| PackageError::Io(e.error))?;
        Ok(PackagedArtifact {
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
            path,
        })
    }
}

impl Packager for ZipPackager {
    fn pack(
        &self,
        project_path: &Path,
        options: &PackOptions,
    ) -> Result<PackagedArtifact, PackageError> {
        if !project_path.is_dir() {
            return Err(PackageError::MissingProject(project_path.to_path_buf()));
        }

        let manifest = ProjectManifest {
            sources_root: SOURCES_ROOT,
            dependencies_root: DEPENDENCIES_ROOT,
            version: MANIFEST_VERSION,
            hil_capabilities: if options.hil_capable {
                vec![HIL_DEPENDENCY_UPGRADE]
            } else {
                Vec::new()
            },
        };

        let artifact = self.write_archive("project", |zip, file_options| {
            zip.start_file("manifest.json", file_options)?;
            zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

            let sources = add_tree(zip, project_path, SOURCES_ROOT, file_options)?;
            if sources == 0 {
                return Err(PackageError::Empty(project_path.to_path_buf()));
            }
            if let Some(deps) = &options.dependencies_dir {
                add_tree(zip, deps, DEPENDENCIES_ROOT, file_options)?;
            }
            debug!(files = sources, "packaged project sources");
            Ok(())
        })?;

        debug!(path = %artifact.path.display(), "packaged project");
        Ok(artifact)
    }

    fn pack_dependency_directory(
        &self,
        path: &Path,
        manifest: &DependencyManifest,
    ) -> Result<PackagedArtifact, PackageError> {
        if !path.is_dir() {
            return Err(PackageError::MissingProject(path.to_path_buf()));
        }

        self.write_archive("dependencies", |zip, file_options| {
            zip.start_file("manifest.json", file_options)?;
            zip.write_all(&serde_json::to_vec_pretty(&DependencyUploadManifest {
                dependencies_root: DEPENDENCIES_ROOT,
                dependency: manifest,
            })?)?;
            add_tree(zip, path, DEPENDENCIES_ROOT, file_options)?;
            Ok(())
        })
    }
}

/// Add every regular file under `root` to the archive below `prefix`.
/// Returns the number of files added.
fn add_tree<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    root: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<usize, PackageError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e.path()))
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            entries.push(entry.into_path());
        }
    }
    // Sorted so the same tree always produces the same archive layout.
    entries.sort();

    let mut buffer = Vec::new();
    for path in &entries {
        let rel = path
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let name = format!("{prefix}{}", rel.to_string_lossy().replace('\\', "/"));
        zip.start_file(name, options)?;
        buffer.clear();
        File::open(path)?.read_to_end(&mut buffer)?;
        zip.write_all(&buffer)?;
    }
    Ok(entries.len())
}

/// Directories that never belong in an upload.
fn is_excluded(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    matches!(
        name,
        ".git" | ".svn" | ".hg" | ".idea" | ".vscode" | ".gradle" | "node_modules" | "target"
    )
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
