use serde::{Deserialize, Serialize};

/// Status attached to plan steps and their progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStepStatus {
    Created,
    NotStarted,
    InProgress,
    Paused,
    AwaitingClientAction,
    Completed,
    PartiallyCompleted,
    Skipped,
    Failed,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// An artifact the service exposes for download from a progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadArtifact {
    pub download_artifact_id: String,
    pub download_artifact_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: PlanStepStatus,
    #[serde(default)]
    pub download_artifacts: Vec<DownloadArtifact>,
}

/// One step of the remote transformation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: PlanStepStatus,
    #[serde(default)]
    pub progress_updates: Vec<ProgressUpdate>,
}

/// Plan as returned by the service: ordered steps plus a rendered summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationPlan {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub rendered_summary: String,
}

/// Where a paused job asks for input: the failed progress update and the
/// artifact it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterventionPoint<'a> {
    pub step: &'a PlanStep,
    pub update: &'a ProgressUpdate,
    pub artifact: &'a DownloadArtifact,
}

/// Locate the first failed progress update that carries a downloadable artifact.
pub fn find_intervention_point(steps: &[PlanStep]) -> Option<InterventionPoint<'_>> {
    steps.iter().find_map(|step| {
        step.progress_updates.iter().find_map(|update| {
            if update.status != PlanStepStatus::Failed {
                return None;
            }
            update
                .download_artifacts
                .first()
                .map(|artifact| InterventionPoint {
                    step,
                    update,
                    artifact,
                })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(name: &str, status: PlanStepStatus, artifact: Option<&str>) -> ProgressUpdate {
        ProgressUpdate {
            name: name.into(),
            description: None,
            status,
            download_artifacts: artifact
                .map(|id| {
                    vec![DownloadArtifact {
                        download_artifact_id: id.into(),
                        download_artifact_type: "BUILT_JAR".into(),
                    }]
                })
                .unwrap_or_default(),
        }
    }

    fn step(name: &str, updates: Vec<ProgressUpdate>) -> PlanStep {
        PlanStep {
            id: name.to_lowercase(),
            name: name.into(),
            description: String::new(),
            status: PlanStepStatus::InProgress,
            progress_updates: updates,
        }
    }

    #[test]
    fn finds_failed_update_with_artifact() {
        let steps = vec![
            step("Preparing", vec![update("Setup", PlanStepStatus::Completed, Some("A0"))]),
            step(
                "Building Code",
                vec![
                    update("Compile", PlanStepStatus::Failed, None),
                    update("Resolve dependency", PlanStepStatus::Failed, Some("A1")),
                ],
            ),
        ];
        let point = find_intervention_point(&steps).unwrap();
        assert_eq!(point.step.name, "Building Code");
        assert_eq!(point.update.name, "Resolve dependency");
        assert_eq!(point.artifact.download_artifact_id, "A1");
    }

    #[test]
    fn no_intervention_point_without_failed_artifact() {
        let steps = vec![step(
            "Building Code",
            vec![update("Compile", PlanStepStatus::Failed, None)],
        )];
        assert!(find_intervention_point(&steps).is_none());
        assert!(find_intervention_point(&[]).is_none());
    }

    #[test]
    fn plan_deserializes_from_service_format() {
        let json = r#"{
            "steps": [{
                "id": "s1",
                "name": "Building Code",
                "status": "PAUSED",
                "progressUpdates": [{
                    "name": "Dependency upgrade",
                    "status": "FAILED",
                    "downloadArtifacts": [
                        {"downloadArtifactId": "A1", "downloadArtifactType": "BUILT_JAR"}
                    ]
                }]
            }, {
                "id": "s2",
                "name": "Future step",
                "status": "SOMETHING_ELSE"
            }],
            "renderedSummary": "Upgrade plan"
        }"#;
        let plan: TransformationPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].status, PlanStepStatus::Paused);
        assert_eq!(plan.steps[1].status, PlanStepStatus::Unknown);
        assert_eq!(plan.rendered_summary, "Upgrade plan");
        assert!(find_intervention_point(&plan.steps).is_some());
    }
}
