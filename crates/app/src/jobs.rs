use std::collections::HashMap;
use std::sync::Mutex;

/// Progress of one in-flight import, keyed by batch id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running { processed: u32, total: u32 },
    Failed { message: String },
}

/// In-process import progress map. Created once per process and injected
/// into the pipeline; entries for completed batches are pruned, so the map
/// only ever holds live or failed jobs.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<i64, JobStatus>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, batch_id: i64, total: u32) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        jobs.insert(batch_id, JobStatus::Running { processed: 0, total });
    }

    pub fn progress(&self, batch_id: i64, processed: u32) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        if let Some(JobStatus::Running { processed: p, .. }) = jobs.get_mut(&batch_id) {
            *p = processed;
        }
    }

    /// Completion prunes the entry.
    pub fn finish(&self, batch_id: i64) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        jobs.remove(&batch_id);
    }

    pub fn fail(&self, batch_id: i64, message: &str) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        jobs.insert(
            batch_id,
            JobStatus::Failed {
                message: message.to_string(),
            },
        );
    }

    pub fn get(&self, batch_id: i64) -> Option<JobStatus> {
        let jobs = self.jobs.lock().expect("job map poisoned");
        jobs.get(&batch_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_runs_then_prunes() {
        let tracker = JobTracker::new();
        tracker.start(7, 10);
        assert_eq!(
            tracker.get(7),
            Some(JobStatus::Running { processed: 0, total: 10 })
        );

        tracker.progress(7, 4);
        assert_eq!(
            tracker.get(7),
            Some(JobStatus::Running { processed: 4, total: 10 })
        );

        tracker.finish(7);
        assert_eq!(tracker.get(7), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn failed_jobs_stay_visible() {
        let tracker = JobTracker::new();
        tracker.start(3, 5);
        tracker.fail(3, "storage unavailable");
        assert_eq!(
            tracker.get(3),
            Some(JobStatus::Failed { message: "storage unavailable".to_string() })
        );
    }

    #[test]
    fn progress_on_unknown_job_is_ignored() {
        let tracker = JobTracker::new();
        tracker.progress(99, 1);
        assert!(tracker.is_empty());
    }
}
