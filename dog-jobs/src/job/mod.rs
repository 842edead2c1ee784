pub mod registry;

pub use registry::{DefinitionSource, JobDefinition, JobRegistry};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::backend::ItemReporter;
use crate::{JobError, JobId, JobsError, JobsResult};

/// What a handler sees of the item it processes
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    data: Arc<Map<String, Value>>,
    reporter: Arc<dyn ItemReporter>,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        attempt: u32,
        data: Arc<Map<String, Value>>,
        reporter: Arc<dyn ItemReporter>,
    ) -> Self {
        Self {
            job_id,
            attempt,
            data,
            reporter,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Attempt number, starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Read-only job data
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserialize the job data into a typed payload
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(Value::Object(self.data.as_ref().clone()))
            .map_err(|e| JobError::permanent(format!("Failed to deserialize job data: {}", e)))
    }

    /// Append a line to the item's log
    pub fn log(&self, message: impl AsRef<str>) {
        self.reporter.log(message.as_ref());
    }

    /// Report progress as `completed` out of `total`
    pub fn progress(&self, completed: u64, total: u64) {
        self.reporter.progress(completed, total);
    }
}

/// Business logic for one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> Result<Value, JobError>;
}

/// Adapts an async closure into a [`JobHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, JobError>> + Send,
{
    async fn handle(&self, ctx: JobContext) -> Result<Value, JobError> {
        (self.0)(ctx).await
    }
}

/// Job name to handler lookup table, supplied when processing starts
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a job name
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> JobsResult<()>
    where
        H: JobHandler + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(JobsError::DuplicateHandler(name));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Register an async closure as the handler for a job name
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> JobsResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.register(name, FnHandler(handler))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
