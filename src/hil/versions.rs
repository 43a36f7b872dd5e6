use serde::Serialize;

use super::pom::{dependency_blocks, leaf_elements};
use super::resolver::{Dependency, ResolveError};

/// Newer releases of a dependency, grouped by how far they move.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyVersions {
    pub current: Option<String>,
    pub latest: Option<String>,
    pub majors: Vec<String>,
    pub minors: Vec<String>,
    pub incrementals: Vec<String>,
}

impl DependencyVersions {
    pub fn is_empty(&self) -> bool {
        self.latest.is_none()
            && self.majors.is_empty()
            && self.minors.is_empty()
            && self.incrementals.is_empty()
    }

    /// Every offered version, newest group first, without duplicates.
    pub fn candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let groups = self
            .latest
            .iter()
            .chain(&self.majors)
            .chain(&self.minors)
            .chain(&self.incrementals);
        for version in groups {
            if !out.contains(version) {
                out.push(version.clone());
            }
        }
        out
    }
}

/// Parse a Maven versions-plugin XML report and pick out `dependency`.
///
/// The report lists only dependencies with updates, so a missing entry means
/// nothing newer exists.
pub fn parse_versions_report(
    xml: &str,
    dependency: &Dependency,
) -> Result<DependencyVersions, ResolveError> {
    if !xml.contains("<DependencyUpdatesReport") {
        return Err(ResolveError::MalformedReport(
            "missing DependencyUpdatesReport root".to_string(),
        ));
    }

    for range in dependency_blocks(xml) {
        let mut group_id = None;
        let mut artifact_id = None;
        let mut status = None;
        let mut versions = DependencyVersions::default();

        for (name, value, _) in leaf_elements(&xml[range]) {
            match name {
                "groupId" => group_id = Some(value),
                "artifactId" => artifact_id = Some(value),
                "status" => status = Some(value),
                "currentVersion" => versions.current = Some(value.to_string()),
                "lastVersion" | "latestVersion" => versions.latest = Some(value.to_string()),
                "major" => versions.majors.push(value.to_string()),
                "minor" => versions.minors.push(value.to_string()),
                "incremental" => versions.incrementals.push(value.to_string()),
                _ => {}
            }
        }

        if group_id != Some(dependency.group_id.as_str())
            || artifact_id != Some(dependency.artifact_id.as_str())
        {
            continue;
        }
        if status == Some("no new available") || versions.is_empty() {
            break;
        }
        return Ok(versions);
    }

    Err(ResolveError::NoVersionsAvailable {
        dependency: dependency.to_string(),
    })
}

/// What the user is asked to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChoice {
    pub dependency: Dependency,
    pub versions: DependencyVersions,
}

impl VersionChoice {
    pub fn new(dependency: Dependency, versions: DependencyVersions) -> Self {
        Self {
            dependency,
            versions,
        }
    }

    pub fn offers(&self, version: &str) -> bool {
        self.versions.candidates().iter().any(|v| v == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DependencyUpdatesReport>
  <summary>
    <usingLastVersion>0</usingLastVersion>
  </summary>
  <dependencies>
    <dependency>
      <groupId>org.other</groupId>
      <artifactId>lib</artifactId>
      <currentVersion>0.1</currentVersion>
      <lastVersion>0.9</lastVersion>
      <status>minor available</status>
    </dependency>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>lib</artifactId>
      <scope>compile</scope>
      <classifier/>
      <type>jar</type>
      <currentVersion>1.2.0</currentVersion>
      <lastVersion>3.0.0</lastVersion>
      <incrementals>
        <incremental>1.2.1</incremental>
      </incrementals>
      <minors>
        <minor>1.3.0</minor>
      </minors>
      <majors>
        <major>2.1.0</major>
        <major>3.0.0</major>
      </majors>
      <status>major available</status>
    </dependency>
  </dependencies>
</DependencyUpdatesReport>
"#;

    fn dep(group: &str, artifact: &str) -> Dependency {
        Dependency {
            group_id: group.into(),
            artifact_id: artifact.into(),
            current_version: "1.2.0".into(),
        }
    }

    #[test]
    fn parses_matching_dependency() {
        let versions = parse_versions_report(REPORT, &dep("org.example", "lib")).unwrap();
        assert_eq!(versions.current.as_deref(), Some("1.2.0"));
        assert_eq!(versions.latest.as_deref(), Some("3.0.0"));
        assert_eq!(versions.majors, vec!["2.1.0", "3.0.0"]);
        assert_eq!(versions.minors, vec!["1.3.0"]);
        assert_eq!(versions.incrementals, vec!["1.2.1"]);
        assert_eq!(
            versions.candidates(),
            vec!["3.0.0", "2.1.0", "1.3.0", "1.2.1"]
        );
    }

    #[test]
    fn absent_dependency_has_no_versions() {
        let err = parse_versions_report(REPORT, &dep("org.example", "missing")).unwrap_err();
        assert!(matches!(err, ResolveError::NoVersionsAvailable { ref dependency } if dependency == "org.example:missing"));
    }

    #[test]
    fn no_new_available_status_has_no_versions() {
        let report = r#"<DependencyUpdatesReport><dependencies>
            <dependency><groupId>g</groupId><artifactId>a</artifactId>
            <currentVersion>1</currentVersion><status>no new available</status></dependency>
            </dependencies></DependencyUpdatesReport>"#;
        assert!(matches!(
            parse_versions_report(report, &dep("g", "a")),
            Err(ResolveError::NoVersionsAvailable { .. })
        ));
    }

    #[test]
    fn rejects_foreign_documents() {
        assert!(matches!(
            parse_versions_report("<project/>", &dep("g", "a")),
            Err(ResolveError::MalformedReport(_))
        ));
    }

    #[test]
    fn choice_offers_listed_versions_only() {
        let versions = parse_versions_report(REPORT, &dep("org.example", "lib")).unwrap();
        let choice = VersionChoice::new(dep("org.example", "lib"), versions);
        assert!(choice.offers("2.1.0"));
        assert!(!choice.offers("9.0.0"));
    }
}
