use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state_machine::{JobId, JobSnapshot, JobStatus};

/// One row of the job history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub job_id: JobId,
    pub project_name: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

/// Shared record of every job this process has run, refreshed on each
/// progress tick and once more when a job finishes.
#[derive(Debug, Clone, Default)]
pub struct JobHistory {
    entries: Arc<Mutex<BTreeMap<JobId, HistoryEntry>>>,
}

impl JobHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobId, HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshots without a job id (still uploading) are skipped.
    pub fn update(&self, snapshot: &JobSnapshot, elapsed: Duration) {
        let Some(job_id) = &snapshot.job_id else {
            return;
        };
        self.lock().insert(
            job_id.clone(),
            HistoryEntry {
                job_id: job_id.clone(),
                project_name: snapshot.project_name.clone(),
                status: snapshot.status,
                started_at: snapshot.started_at,
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            },
        );
    }

    pub fn get(&self, job_id: &JobId) -> Option<HistoryEntry> {
        self.lock().get(job_id).cloned()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self.lock().values().cloned().collect();
        entries.sort_by_key(|e| e.started_at);
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
