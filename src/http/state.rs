use crate::analysis::{AnalysisResult, Analyzer, CancelHandle};
use crate::config::HttpConfig;
use crate::session::LiveSession;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// Lifecycle of a background analysis
#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Completed(AnalysisResult),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub cancel: CancelHandle,
    pub status: JobStatus,
    finished_at: Option<Instant>,
}

/// Background analyses by id.
///
/// Pending jobs stay until they finish. Finished jobs are dropped once they
/// are older than `retention`, and only the newest `capacity` of them are kept.
#[derive(Debug)]
pub struct JobTable {
    capacity: usize,
    retention: Duration,
    entries: HashMap<Uuid, JobEntry>,
    finished: VecDeque<Uuid>,
}

impl JobTable {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity,
            retention,
            entries: HashMap::new(),
            finished: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, id: Uuid, cancel: CancelHandle) {
        self.prune(Instant::now());
        self.entries.insert(
            id,
            JobEntry {
                cancel,
                status: JobStatus::Pending,
                finished_at: None,
            },
        );
    }

    pub fn finish(&mut self, id: Uuid, status: JobStatus) {
        let now = Instant::now();
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.finished_at.is_none() {
                self.finished.push_back(id);
            }
            entry.status = status;
            entry.finished_at = Some(now);
        }
        self.prune(now);
    }

    pub fn get(&mut self, id: &Uuid) -> Option<&JobEntry> {
        self.prune(Instant::now());
        self.entries.get(id)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.finished.front().copied() {
            let expired = self
                .entries
                .get(&oldest)
                .and_then(|e| e.finished_at)
                .map_or(true, |at| now.duration_since(at) >= self.retention);
            if !expired && self.finished.len() <= self.capacity {
                break;
            }
            self.finished.pop_front();
            self.entries.remove(&oldest);
        }
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,

    /// Live recording engine, when one is configured
    pub live: Option<Arc<LiveSession>>,

    /// Background analyses (analysis_id → entry)
    pub jobs: Arc<RwLock<JobTable>>,
}

impl AppState {
    pub fn new(analyzer: Arc<Analyzer>, live: Option<Arc<LiveSession>>) -> Self {
        Self::with_limits(analyzer, live, &HttpConfig::default())
    }

    pub fn with_limits(
        analyzer: Arc<Analyzer>,
        live: Option<Arc<LiveSession>>,
        http: &HttpConfig,
    ) -> Self {
        Self {
            analyzer,
            live,
            jobs: Arc::new(RwLock::new(JobTable::new(
                http.max_finished_jobs,
                http.job_retention(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fallback;

    fn cancel_handle() -> CancelHandle {
        CancelHandle::new()
    }

    fn done() -> JobStatus {
        JobStatus::Completed(fallback::synthesize(10, 20))
    }

    #[tokio::test(start_paused = true)]
    async fn finished_jobs_expire_after_retention() {
        let mut jobs = JobTable::new(8, Duration::from_secs(60));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        jobs.insert(a, cancel_handle());
        jobs.insert(b, cancel_handle());
        jobs.finish(a, done());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(jobs.get(&a).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(jobs.get(&a).is_none());
        // Still running, so never evicted
        assert!(jobs.get(&b).is_some());
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_newest_finished_jobs_are_kept() {
        let mut jobs = JobTable::new(2, Duration::from_secs(600));
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let pending = Uuid::new_v4();
        jobs.insert(pending, cancel_handle());
        for id in &ids {
            jobs.insert(*id, cancel_handle());
            jobs.finish(*id, JobStatus::Cancelled);
        }

        assert!(jobs.get(&ids[0]).is_none());
        assert!(jobs.get(&ids[1]).is_some());
        assert!(jobs.get(&ids[2]).is_some());
        assert!(jobs.get(&pending).is_some());
        assert_eq!(jobs.len(), 3);
    }
}
