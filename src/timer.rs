use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::events::JobEvents;
use crate::history::JobHistory;
use crate::state_machine::JobSnapshot;

/// Periodic progress notifier for the active job.
///
/// Ticks read the latest [`JobSnapshot`] from a watch channel, so they never
/// touch the job state itself. Dropping the timer aborts the task.
pub struct ProgressTimer {
    handle: Option<JoinHandle<()>>,
    started: Instant,
    events: Arc<dyn JobEvents>,
}

impl ProgressTimer {
    /// Must be called from within a tokio runtime.
    pub fn start(
        period: Duration,
        events: Arc<dyn JobEvents>,
        snapshots: watch::Receiver<JobSnapshot>,
        history: JobHistory,
    ) -> Self {
        events.progress_started();
        let started = Instant::now();
        let period = period.max(Duration::from_millis(1));
        let tick_events = Arc::clone(&events);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(started + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let snapshot = snapshots.borrow().clone();
                let elapsed = started.elapsed();
                tick_events.progress_tick(elapsed, &snapshot);
                history.update(&snapshot, elapsed);
            }
        });

        Self {
            handle: Some(handle),
            started,
            events,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop ticking and report the total running time.
    pub fn stop(mut self) -> Duration {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        let elapsed = self.elapsed();
        self.events.progress_stopped(elapsed);
        elapsed
    }
}

impl Drop for ProgressTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for ProgressTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTimer")
            .field("running", &self.handle.is_some())
            .field("elapsed", &self.elapsed())
            .finish()
    }
}
