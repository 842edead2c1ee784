use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

/// Live counters kept by the orchestration layer
#[derive(Debug, Default)]
pub struct JobStats {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    lock_contended: AtomicU64,

    // Per-job-type counters
    by_type: RwLock<HashMap<String, JobTypeStats>>,
}

/// Counters for one job type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobTypeStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub lock_contended: u64,
    pub total_execution_time: Duration,
}

impl JobTypeStats {
    /// Mean handler time over completed and failed executions
    pub fn average_execution_time(&self) -> Option<Duration> {
        let runs = u128::from(self.completed) + u128::from(self.failed);
        if runs == 0 {
            return None;
        }
        let nanos = self.total_execution_time.as_nanos() / runs;
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

/// Point-in-time copy of [`JobStats`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub lock_contended: u64,
    pub by_type: HashMap<String, JobTypeStats>,
}

impl JobStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self, job_type: &str) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.update(job_type, |s| s.enqueued += 1);
    }

    pub fn record_completed(&self, job_type: &str, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.update(job_type, |s| {
            s.completed += 1;
            s.total_execution_time += elapsed;
        });
    }

    pub fn record_failed(&self, job_type: &str, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.update(job_type, |s| {
            s.failed += 1;
            s.total_execution_time += elapsed;
        });
    }

    pub fn record_lock_contended(&self, job_type: &str) {
        self.lock_contended.fetch_add(1, Ordering::Relaxed);
        self.update(job_type, |s| s.lock_contended += 1);
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn lock_contended(&self) -> u64 {
        self.lock_contended.load(Ordering::Relaxed)
    }

    /// Counters for a single job type
    pub fn job_type(&self, job_type: &str) -> Option<JobTypeStats> {
        self.by_type.read().get(job_type).cloned()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued(),
            completed: self.completed(),
            failed: self.failed(),
            lock_contended: self.lock_contended(),
            by_type: self.by_type.read().clone(),
        }
    }

    fn update(&self, job_type: &str, apply: impl FnOnce(&mut JobTypeStats)) {
        let mut by_type = self.by_type.write();
        apply(by_type.entry(job_type.to_string()).or_default());
    }
}
