use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::versions::{DependencyVersions, parse_versions_report};

/// Report written by `versions:dependency-updates-aggregate-report`.
const VERSIONS_REPORT: &str = "target/dependency-updates-aggregate-report.xml";

/// Lines of build output kept in [`ResolveError::CommandFailed`].
const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no other versions of {dependency} are available")]
    NoVersionsAvailable { dependency: String },

    #[error("`{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("dependency report not found at {}", .0.display())]
    MissingReport(PathBuf),

    #[error("malformed dependency report: {0}")]
    MalformedReport(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Maven coordinates of the dependency under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub group_id: String,
    pub artifact_id: String,
    pub current_version: String,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

/// Local build tooling used during an intervention.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Newer releases of `dependency` as seen from the project in `project_dir`.
    async fn available_versions(
        &self,
        project_dir: &Path,
        dependency: &Dependency,
    ) -> Result<DependencyVersions, ResolveError>;

    /// Copy the resolved dependency tree of `project_dir` into `output_dir`.
    async fn copy_dependencies(
        &self,
        project_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), ResolveError>;
}

/// Resolver backed by the `mvn` executable.
#[derive(Debug, Clone)]
pub struct MavenResolver {
    command: String,
}

impl MavenResolver {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(&self, project_dir: &Path, args: &[String]) -> Result<(), ResolveError> {
        debug!(command = %self.command, ?args, dir = %project_dir.display(), "running build tool");
        let output = Command::new(&self.command)
            .args(args)
            .current_dir(project_dir)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }
        Err(ResolveError::CommandFailed {
            command: format!("{} {}", self.command, args.join(" ")),
            status: output.status.to_string(),
            output: tail(&String::from_utf8_lossy(&output.stdout)),
        })
    }
}

#[async_trait]
impl DependencyResolver for MavenResolver {
    async fn available_versions(
        &self,
        project_dir: &Path,
        dependency: &Dependency,
    ) -> Result<DependencyVersions, ResolveError> {
        let args = vec![
            "-B".to_string(),
            "versions:dependency-updates-aggregate-report".to_string(),
            "-DonlyProjectDependencies=true".to_string(),
            "-DdependencyUpdatesReportFormats=xml".to_string(),
            format!("-Dincludes={}:{}", dependency.group_id, dependency.artifact_id),
        ];
        self.run(project_dir, &args).await?;

        let report = project_dir.join(VERSIONS_REPORT);
        let xml = match tokio::fs::read_to_string(&report).await {
            Ok(xml) => xml,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ResolveError::MissingReport(report));
            }
            Err(e) => return Err(e.into()),
        };
        parse_versions_report(&xml, dependency)
    }

    async fn copy_dependencies(
        &self,
        project_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), ResolveError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let args = vec![
            "-B".to_string(),
            "dependency:copy-dependencies".to_string(),
            format!("-DoutputDirectory={}", output_dir.display()),
            "-Dmdep.useRepositoryLayout=true".to_string(),
            "-Dmdep.copyPom=true".to_string(),
            "-Dmdep.addParentPoms=true".to_string(),
        ];
        self.run(project_dir, &args).await
    }
}

fn tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}
