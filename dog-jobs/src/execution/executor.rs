use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::DeliveredItem;
use crate::job::{HandlerTable, JobContext, JobRegistry};
use crate::lifecycle::shutdown::contain_panics;
use crate::lock::{HeldLock, LockCoordinator};
use crate::observability::JobStats;
use crate::{JobError, JobsError, JobsResult};

/// Runs one delivered item through its handler, under the uniqueness lock
/// when the job opts into one
pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    handlers: Arc<HandlerTable>,
    locks: LockCoordinator,
    stats: Arc<JobStats>,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        handlers: Arc<HandlerTable>,
        locks: LockCoordinator,
        stats: Arc<JobStats>,
    ) -> Self {
        Self {
            registry,
            handlers,
            locks,
            stats,
        }
    }

    /// Execute `item` as an instance of `job_name`.
    ///
    /// A lock that could not be taken fails the item without running the
    /// handler. A lock that was taken is released on every path.
    #[instrument(skip(self, item), fields(job = %job_name, job_id = %item.id, attempt = item.attempt))]
    pub async fn execute(&self, job_name: &str, item: DeliveredItem) -> JobsResult<Value> {
        let definition = self.registry.get(job_name)?;
        let handler = self
            .handlers
            .get(job_name)
            .ok_or_else(|| JobsError::MissingHandler(job_name.to_string()))?;

        let lock = match definition.lock_target(&item.data) {
            Some((unique_value, ttl)) => match self.locks.acquire(job_name, &unique_value, ttl).await {
                Ok(held) => Some(held),
                Err(e) => {
                    if matches!(e, JobsError::LockContention { .. }) {
                        self.stats.record_lock_contended(job_name);
                    }
                    warn!("Skipping {} item {}: {}", job_name, item.id, e);
                    return Err(e);
                }
            },
            None => None,
        };

        let ctx = JobContext::new(item.id.clone(), item.attempt, item.data.clone(), item.reporter.clone());
        let started = Instant::now();

        let outcome = match contain_panics(AssertUnwindSafe(handler.handle(ctx)).catch_unwind()).await {
            Ok(result) => result,
            Err(panic) => {
                error!("Handler for {} panicked on item {}", job_name, item.id);
                Err(JobError::retryable(format!("handler panicked: {}", panic_message(panic.as_ref()))))
            }
        };

        release(lock).await;

        let elapsed = started.elapsed();
        match outcome {
            Ok(result) => {
                self.stats.record_completed(job_name, elapsed);
                info!("Job {} item {} completed in {:?}", job_name, item.id, elapsed);
                Ok(result)
            }
            Err(e) => {
                self.stats.record_failed(job_name, elapsed);
                warn!("Job {} item {} failed: {}", job_name, item.id, e);
                Err(JobsError::Handler(e))
            }
        }
    }
}

async fn release(lock: Option<HeldLock>) {
    if let Some(held) = lock {
        debug!("Releasing {}", held.resource());
        held.release().await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
