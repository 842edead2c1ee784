pub mod memory;

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::{ItemHandle, ItemRecord, JobId, JobsResult, NewItem};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Contract of the shared work queue this layer runs on
///
/// Durability, visibility, retry scheduling and ordering belong to the
/// implementation; the orchestration layer only persists items, registers
/// consumers, and asks for a drain on shutdown.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Persist a new item and return its handle
    async fn persist(&self, item: NewItem) -> JobsResult<ItemHandle>;

    /// Deliver items of `queue` to `consumer`, at most `concurrency` at a time
    async fn register_consumer(
        &self,
        queue: &str,
        concurrency: usize,
        consumer: Arc<dyn ItemConsumer>,
    ) -> JobsResult<()>;

    /// Stop delivering and wait up to `grace_period` for in-flight items
    async fn shutdown(&self, grace_period: Duration) -> JobsResult<()>;

    /// Look up an item by id
    async fn lookup(&self, id: &JobId) -> JobsResult<Option<ItemRecord>>;
}

/// Receives items delivered by the queue
///
/// The returned value becomes the item's result, the error its failure.
#[async_trait]
pub trait ItemConsumer: Send + Sync {
    async fn consume(&self, item: DeliveredItem) -> JobsResult<Value>;
}

/// Progress callbacks the queue attaches to a delivered item
pub trait ItemReporter: Send + Sync {
    fn log(&self, message: &str);

    fn progress(&self, completed: u64, total: u64);
}

/// Reporter that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ItemReporter for NoopReporter {
    fn log(&self, _message: &str) {}

    fn progress(&self, _completed: u64, _total: u64) {}
}

/// An item handed to a consumer
#[derive(Clone)]
pub struct DeliveredItem {
    pub id: JobId,
    pub queue: String,
    pub attempt: u32,
    pub data: Arc<Map<String, Value>>,
    pub reporter: Arc<dyn ItemReporter>,
}

impl DeliveredItem {
    pub fn new(
        id: JobId,
        queue: impl Into<String>,
        attempt: u32,
        data: Map<String, Value>,
        reporter: Arc<dyn ItemReporter>,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            attempt,
            data: Arc::new(data),
            reporter,
        }
    }
}

/// Percentage for a `completed` out of `total` report, clamped to 100
pub fn progress_percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = completed.saturating_mul(100) / total;
    percent.min(100) as u8
}
