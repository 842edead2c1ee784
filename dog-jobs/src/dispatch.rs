//! Worker dispatcher: binds one queue consumer per job definition.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::backend::{DeliveredItem, ItemConsumer, QueueBackend};
use crate::execution::JobExecutor;
use crate::job::{HandlerTable, JobRegistry};
use crate::{JobsError, JobsResult};

/// Routes deliveries of one queue into the executor
pub struct JobConsumer {
    job_name: String,
    executor: Arc<JobExecutor>,
}

impl JobConsumer {
    pub fn new(job_name: impl Into<String>, executor: Arc<JobExecutor>) -> Self {
        Self {
            job_name: job_name.into(),
            executor,
        }
    }
}

#[async_trait]
impl ItemConsumer for JobConsumer {
    async fn consume(&self, item: DeliveredItem) -> JobsResult<Value> {
        self.executor.execute(&self.job_name, item).await
    }
}

/// Check that handlers and definitions line up one-to-one
pub fn validate_handlers(registry: &JobRegistry, handlers: &HandlerTable) -> JobsResult<()> {
    let mut names = handlers.names();
    names.sort();

    for name in names {
        if !registry.contains(&name) {
            return Err(JobsError::UnknownJob(name));
        }
    }

    for name in registry.names() {
        if !handlers.is_registered(name) {
            return Err(JobsError::MissingHandler(name.clone()));
        }
    }

    Ok(())
}

pub struct Dispatcher {
    queue: Arc<dyn QueueBackend>,
    executor: Arc<JobExecutor>,
    prefix: String,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn QueueBackend>, executor: Arc<JobExecutor>, prefix: impl Into<String>) -> Self {
        Self {
            queue,
            executor,
            prefix: prefix.into(),
        }
    }

    /// Register a consumer for every definition, in declaration order
    pub async fn register_all(&self, registry: &JobRegistry) -> JobsResult<usize> {
        let mut registered = 0;

        for definition in registry.iter() {
            let queue_name = definition.queue_name(&self.prefix);
            let consumer = Arc::new(JobConsumer::new(definition.name.clone(), self.executor.clone()));

            self.queue
                .register_consumer(&queue_name, definition.concurrency, consumer)
                .await?;

            info!(
                "Registered consumer for {} with concurrency {}",
                queue_name, definition.concurrency
            );
            registered += 1;
        }

        Ok(registered)
    }
}
