use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, info, warn};

use crate::{
    backend::{progress_percent, BoxStream, DeliveredItem, ItemConsumer, ItemReporter, QueueBackend},
    ItemHandle, ItemRecord, ItemStatus, JobError, JobEvent, JobId, JobsError, JobsResult, NewItem,
};

/// How often idle consumers look for delayed items that became due
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A registered consumer loop and its concurrency permits
pub(crate) struct ConsumerSlot {
    queue: String,
    permits: Arc<Semaphore>,
    concurrency: usize,
    task: JoinHandle<()>,
}

/// In-memory queue backend
#[derive(Clone)]
pub struct MemoryBackend {
    /// Item records indexed by id
    pub(crate) items: Arc<RwLock<HashMap<JobId, ItemRecord>>>,

    /// Pending item ids per queue, priority ordered
    pub(crate) queues: Arc<RwLock<HashMap<String, VecDeque<JobId>>>>,

    /// Wakes a queue's consumer when an item becomes available
    wakers: Arc<RwLock<HashMap<String, Arc<Notify>>>>,

    consumers: Arc<Mutex<Vec<ConsumerSlot>>>,

    /// Event broadcaster for observability
    pub(crate) event_broadcaster: broadcast::Sender<JobEvent>,

    shutdown_tx: Arc<watch::Sender<bool>>,

    pub(crate) poll_interval: Duration,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(RwLock::new(HashMap::new())),
            wakers: Arc::new(RwLock::new(HashMap::new())),
            consumers: Arc::new(Mutex::new(Vec::new())),
            event_broadcaster,
            shutdown_tx: Arc::new(shutdown_tx),
            poll_interval,
        }
    }

    /// Subscribe to item lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Item lifecycle events as a stream; lagged events are skipped
    pub fn event_stream(&self) -> BoxStream<JobEvent> {
        Box::pin(BroadcastStream::new(self.event_broadcaster.subscribe()).filter_map(|event| event.ok()))
    }

    /// Number of items waiting or delayed in `queue`
    pub fn pending_count(&self, queue: &str) -> usize {
        self.queues.read().get(queue).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    pub(crate) fn waker(&self, queue: &str) -> Arc<Notify> {
        if let Some(waker) = self.wakers.read().get(queue) {
            return waker.clone();
        }
        self.wakers
            .write()
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Insert `id` into its queue: higher priority first, FIFO within a level
    fn push_ordered(&self, queue: &str, id: &JobId) {
        let mut queues = self.queues.write();
        let items = self.items.read();

        let Some(record) = items.get(id) else {
            return;
        };
        let rank = |r: &ItemRecord| (Reverse(r.item.priority.unwrap_or_default()), r.created_at);
        let key = rank(record);

        let pending = queues.entry(queue.to_string()).or_default();
        let position = pending
            .iter()
            .position(|other| items.get(other).map(|o| key < rank(o)).unwrap_or(true))
            .unwrap_or(pending.len());

        pending.insert(position, id.clone());
    }

    /// Take the first eligible item of `queue` and start an attempt on it
    pub(crate) fn take_next(&self, queue: &str) -> Option<ItemRecord> {
        let now = Utc::now();
        let snapshot = {
            let mut queues = self.queues.write();
            let pending = queues.get_mut(queue)?;
            let mut items = self.items.write();

            let mut index = 0;
            while index < pending.len() {
                match items.get(&pending[index]) {
                    Some(record) if record.status.is_eligible(now) => break,
                    Some(record) if matches!(record.status, ItemStatus::Delayed { .. }) => index += 1,
                    // Stale entry: completed, removed, or already active
                    _ => {
                        pending.remove(index);
                    }
                }
            }

            let id = pending.remove(index)?;
            let record = items.get_mut(&id)?;
            record.start_attempt();
            record.clone()
        };

        self.emit(JobEvent::Started {
            job_id: snapshot.id.clone(),
            attempt: snapshot.attempt,
            at: now,
        });

        Some(snapshot)
    }

    /// Run one attempt of `record` through `consumer` and record the outcome
    pub(crate) async fn process(&self, record: ItemRecord, consumer: Arc<dyn ItemConsumer>) {
        let id = record.id.clone();
        let attempt = record.attempt;

        let reporter = Arc::new(MemoryReporter {
            backend: self.clone(),
            id: id.clone(),
        });
        let delivered = DeliveredItem::new(
            id.clone(),
            record.item.queue.clone(),
            attempt,
            record.item.data.clone(),
            reporter,
        );

        let mut task = tokio::spawn(async move { consumer.consume(delivered).await });

        let outcome = match record.item.max_duration {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined.unwrap_or_else(|e| Err(consumer_crashed(e))),
                Err(_) => {
                    warn!("Item {} exceeded its processing time of {:?}", id, limit);
                    self.finish(&id, attempt, Err(JobsError::ItemTimedOut(limit)));
                    // The handler is not interrupted; its slot stays taken until it returns
                    let _ = task.await;
                    return;
                }
            },
            None => task.await.unwrap_or_else(|e| Err(consumer_crashed(e))),
        };

        self.finish(&id, attempt, outcome);
    }

    /// Apply the outcome of an attempt: complete, schedule a retry, or fail
    pub(crate) fn finish(&self, id: &JobId, attempt: u32, outcome: JobsResult<Value>) {
        let now = Utc::now();
        let mut requeue = None;

        let event = {
            let mut items = self.items.write();
            let Some(record) = items.get_mut(id) else {
                return;
            };

            if record.attempt != attempt || !matches!(record.status, ItemStatus::Active { .. }) {
                debug!("Ignoring late outcome for item {} attempt {}", id, attempt);
                return;
            }

            match outcome {
                Ok(result) => {
                    if record.item.remove_on_complete {
                        items.remove(id);
                    } else {
                        record.complete(result);
                    }
                    debug!("Item {} completed", id);
                    JobEvent::Completed { job_id: id.clone(), at: now }
                }
                Err(err) if err.is_retryable() && record.can_retry() => {
                    let delay = record
                        .item
                        .backoff
                        .map(|backoff| backoff.delay_for(record.attempt))
                        .unwrap_or(Duration::ZERO);
                    let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    let error = err.to_string();

                    record.schedule_retry(retry_at, error.clone());
                    requeue = Some(record.item.queue.clone());
                    warn!("Item {} failed attempt {}, will retry: {}", id, attempt, error);
                    JobEvent::Retrying {
                        job_id: id.clone(),
                        retry_at,
                        error,
                        at: now,
                    }
                }
                Err(err) => {
                    let error = err.to_string();
                    record.fail(error.clone());
                    warn!("Item {} failed permanently: {}", id, error);
                    JobEvent::Failed {
                        job_id: id.clone(),
                        error,
                        at: now,
                    }
                }
            }
        };

        self.emit(event);

        if let Some(queue) = requeue {
            self.push_ordered(&queue, id);
            self.waker(&queue).notify_one();
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn consumer_crashed(err: tokio::task::JoinError) -> JobsError {
    JobsError::Handler(JobError::retryable(format!("consumer task failed: {}", err)))
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn persist(&self, item: NewItem) -> JobsResult<ItemHandle> {
        if self.is_shutting_down() {
            return Err(JobsError::Persistence("queue is shutting down".to_string()));
        }

        let id = JobId::new();
        let record = ItemRecord::new(id.clone(), item);
        let handle = record.handle();

        self.items.write().insert(id.clone(), record);
        self.push_ordered(&handle.queue, &id);

        self.emit(JobEvent::Enqueued {
            job_id: id.clone(),
            queue: handle.queue.clone(),
            at: handle.created_at,
        });
        self.waker(&handle.queue).notify_one();

        debug!("Persisted item {} on {}", id, handle.queue);
        Ok(handle)
    }

    async fn register_consumer(
        &self,
        queue: &str,
        concurrency: usize,
        consumer: Arc<dyn ItemConsumer>,
    ) -> JobsResult<()> {
        if self.is_shutting_down() {
            return Err(JobsError::WorkerShutdown);
        }
        if concurrency == 0 {
            return Err(JobsError::InvalidInput {
                job: queue.to_string(),
                reason: "concurrency must be positive".to_string(),
            });
        }

        let permits = Arc::new(Semaphore::new(concurrency));
        let task = tokio::spawn(super::consumer::run(
            self.clone(),
            queue.to_string(),
            consumer,
            permits.clone(),
            self.waker(queue),
            self.shutdown_tx.subscribe(),
        ));

        self.consumers.lock().push(ConsumerSlot {
            queue: queue.to_string(),
            permits,
            concurrency,
            task,
        });

        info!("Registered consumer for {} with concurrency {}", queue, concurrency);
        Ok(())
    }

    async fn shutdown(&self, grace_period: Duration) -> JobsResult<()> {
        if self.shutdown_tx.send_replace(true) {
            debug!("Memory queue already shutting down");
            return Ok(());
        }

        let slots = std::mem::take(&mut *self.consumers.lock());
        info!("Draining {} consumers (grace period {:?})", slots.len(), grace_period);

        // Holding every permit of a consumer means none of its items are in flight
        let drain = async {
            for slot in &slots {
                let _ = slot.permits.acquire_many(slot.concurrency as u32).await;
                debug!("Consumer for {} drained", slot.queue);
            }
        };

        if tokio::time::timeout(grace_period, drain).await.is_err() {
            warn!("Grace period of {:?} elapsed with items still in flight", grace_period);
        } else {
            info!("Memory queue drained");
        }

        for slot in slots {
            slot.task.abort();
        }
        Ok(())
    }

    async fn lookup(&self, id: &JobId) -> JobsResult<Option<ItemRecord>> {
        Ok(self.items.read().get(id).cloned())
    }
}

/// Writes handler logs and progress into the item record
struct MemoryReporter {
    backend: MemoryBackend,
    id: JobId,
}

impl ItemReporter for MemoryReporter {
    fn log(&self, message: &str) {
        debug!(job_id = %self.id, "{}", message);
        if let Some(record) = self.backend.items.write().get_mut(&self.id) {
            record.logs.push(message.to_string());
        }
    }

    fn progress(&self, completed: u64, total: u64) {
        let percent = progress_percent(completed, total);
        if let Some(record) = self.backend.items.write().get_mut(&self.id) {
            record.progress = percent;
            record.updated_at = Utc::now();
        }
        self.backend.emit(JobEvent::Progress {
            job_id: self.id.clone(),
            percent,
            at: Utc::now(),
        });
    }
}
