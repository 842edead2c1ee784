use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use dog_jobs::backend::{ItemConsumer, QueueBackend};
use dog_jobs::lock::Lease;
use dog_jobs::prelude::*;
use dog_jobs::{
    Clients, ItemRecord, ItemStatus, LifecycleState, LockService, MemoryBackend, MemoryLockService, NewItem,
};

/// Queue wrapper that counts registrations and shutdowns
#[derive(Clone, Default)]
struct CountingQueue {
    inner: MemoryBackend,
    registered: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    /// Registration number (1-based) that fails instead of registering
    refuse_registration: Option<usize>,
}

#[async_trait]
impl QueueBackend for CountingQueue {
    async fn persist(&self, item: NewItem) -> JobsResult<ItemHandle> {
        self.inner.persist(item).await
    }

    async fn register_consumer(&self, queue: &str, concurrency: usize, consumer: Arc<dyn ItemConsumer>) -> JobsResult<()> {
        let number = self.registered.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse_registration == Some(number) {
            return Err(JobsError::Persistence(format!("cannot register consumer for {}", queue)));
        }
        self.inner.register_consumer(queue, concurrency, consumer).await
    }

    async fn shutdown(&self, grace_period: Duration) -> JobsResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown(grace_period).await
    }

    async fn lookup(&self, id: &JobId) -> JobsResult<Option<ItemRecord>> {
        self.inner.lookup(id).await
    }
}

/// Lock service wrapper that counts calls
#[derive(Clone, Default)]
struct CountingLocks {
    inner: MemoryLockService,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl LockService for CountingLocks {
    async fn acquire(&self, resource: &str, ttl: Duration) -> JobsResult<Lease> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire(resource, ttl).await
    }

    async fn release(&self, lease: &Lease) -> JobsResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(lease).await
    }
}

struct Harness {
    system: JobSystem,
    queue: CountingQueue,
    locks: CountingLocks,
}

async fn harness(catalog: &str) -> Harness {
    harness_with_queue(
        catalog,
        CountingQueue {
            inner: MemoryBackend::with_poll_interval(Duration::from_millis(10)),
            ..CountingQueue::default()
        },
    )
    .await
}

async fn harness_with_queue(catalog: &str, queue: CountingQueue) -> Harness {
    let locks = CountingLocks::default();
    let system = JobSystem::new();

    let settings = JobsSettings::new("test", DefinitionSource::Json(catalog.to_string()))
        .with_shutdown(ShutdownSettings::manual());
    system
        .configure_with_clients(settings, Clients::new(Arc::new(queue.clone()), Arc::new(locks.clone())))
        .await
        .unwrap();

    Harness { system, queue, locks }
}

fn noop_handlers(names: &[&str]) -> HandlerTable {
    let mut handlers = HandlerTable::new();
    for name in names {
        handlers.register_fn(*name, |_ctx: JobContext| async { Ok(Value::Null) }).unwrap();
    }
    handlers
}

async fn wait_terminal(system: &JobSystem, id: &JobId) -> ItemRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(record) = system.lookup(id).await.unwrap() {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timeout waiting for item")
}

#[tokio::test]
async fn unknown_job_fails_without_side_effects() {
    let h = harness(r#"[{ "name": "report" }]"#).await;

    let result = h.system.enqueue("nope", json!({ "x": 1 }), Value::Null).await;

    assert!(matches!(result, Err(JobsError::UnknownJob(name)) if name == "nope"));
    assert_eq!(h.queue.inner.pending_count("test:nope"), 0);
    assert_eq!(h.system.stats().unwrap().enqueued(), 0);

    let mut handlers = noop_handlers(&["report"]);
    handlers.register_fn("nope", |_ctx: JobContext| async { Ok(Value::Null) }).unwrap();
    let started = h.system.start_processing(handlers).await;
    assert!(matches!(started, Err(JobsError::UnknownJob(name)) if name == "nope"));
    assert_eq!(h.queue.registered.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn enqueue_merges_defaults_and_options() {
    let h = harness(
        r#"[{
            "name": "report",
            "default": { "a": 1, "b": 2 },
            "options": { "attempts": 3 },
            "timeout": 2000
        }]"#,
    )
    .await;

    let merged = h.system.enqueue("report", json!({ "b": 3 }), json!({ "attempts": 5 })).await.unwrap();
    let inherited = h.system.enqueue("report", json!({}), json!({})).await.unwrap();
    let retained = h
        .system
        .enqueue("report", Value::Null, json!({ "removeOnComplete": false }))
        .await
        .unwrap();

    let record = h.system.lookup(&merged.id).await.unwrap().unwrap();
    assert_eq!(merged.queue, "test:report");
    assert_eq!(Value::Object(record.item.data), json!({ "a": 1, "b": 3 }));
    assert_eq!(record.item.attempts, Some(5));
    assert_eq!(record.item.max_duration, Some(Duration::from_millis(2000)));
    assert!(record.item.remove_on_complete);

    let record = h.system.lookup(&inherited.id).await.unwrap().unwrap();
    assert_eq!(Value::Object(record.item.data), json!({ "a": 1, "b": 2 }));
    assert_eq!(record.item.attempts, Some(3));

    let record = h.system.lookup(&retained.id).await.unwrap().unwrap();
    assert!(!record.item.remove_on_complete);

    let invalid = h.system.enqueue("report", Value::Null, json!({ "attempts": "x" })).await;
    assert!(matches!(invalid, Err(JobsError::InvalidInput { .. })));
    assert_eq!(h.queue.inner.pending_count("test:report"), 3);
}

#[tokio::test]
async fn items_sharing_a_unique_value_never_overlap() {
    let h = harness(r#"[{ "name": "sync", "concurrency": 2, "uniqueKey": "id", "timeout": 1000 }]"#).await;

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut handlers = HandlerTable::new();
    let (r, p) = (running.clone(), peak.clone());
    handlers
        .register_fn("sync", move |_ctx: JobContext| {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(json!("synced"))
            }
        })
        .unwrap();

    let retain = json!({ "removeOnComplete": false });
    let first = h.system.enqueue("sync", json!({ "id": "acct-1" }), retain.clone()).await.unwrap();
    let second = h.system.enqueue("sync", json!({ "id": "acct-1" }), retain.clone()).await.unwrap();
    h.system.start_processing(handlers).await.unwrap();

    let first = wait_terminal(&h.system, &first.id).await;
    let second = wait_terminal(&h.system, &second.id).await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let outcomes = [first.status, second.status];
    let completed = outcomes.iter().filter(|s| matches!(s, ItemStatus::Completed { .. })).count();
    let contended = outcomes
        .iter()
        .filter(|s| matches!(s, ItemStatus::Failed { error, .. } if error.contains("Lock is already held: test:sync:lock:acct-1")))
        .count();
    assert_eq!((completed, contended), (1, 1));
    assert_eq!(h.system.stats().unwrap().lock_contended(), 1);
    assert_eq!(h.locks.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_lock_without_unique_key_or_timeout() {
    let h = harness(
        r#"[
            { "name": "keyed", "uniqueKey": "id" },
            { "name": "timed", "timeout": 1000 }
        ]"#,
    )
    .await;
    h.system.start_processing(noop_handlers(&["keyed", "timed"])).await.unwrap();

    let retain = json!({ "removeOnComplete": false });
    let keyed = h.system.enqueue("keyed", json!({ "id": 1 }), retain.clone()).await.unwrap();
    let timed = h.system.enqueue("timed", json!({ "id": 1 }), retain).await.unwrap();

    wait_terminal(&h.system, &keyed.id).await;
    wait_terminal(&h.system, &timed.id).await;

    assert_eq!(h.locks.acquired.load(Ordering::SeqCst), 0);
    assert_eq!(h.locks.released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_handler_releases_lock_once_and_fails_item() {
    let h = harness(r#"[{ "name": "charge", "uniqueKey": "order", "timeout": 1000 }]"#).await;

    let mut handlers = HandlerTable::new();
    handlers
        .register_fn("charge", |ctx: JobContext| async move {
            ctx.log("calling payment provider");
            ctx.progress(1, 4);
            Err(JobError::permanent("card declined"))
        })
        .unwrap();
    h.system.start_processing(handlers).await.unwrap();

    let handle = h.system.enqueue("charge", json!({ "order": "o-9" }), json!({ "attempts": 3 })).await.unwrap();
    let record = wait_terminal(&h.system, &handle.id).await;

    match record.status {
        ItemStatus::Failed { error, .. } => assert!(error.contains("card declined")),
        other => panic!("Expected failed item, got {:?}", other),
    }
    assert_eq!(record.attempt, 1);
    assert_eq!(record.logs, vec!["calling payment provider".to_string()]);
    assert_eq!(record.progress, 25);
    assert_eq!(h.locks.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(h.locks.released.load(Ordering::SeqCst), 1);
    assert!(!h.locks.inner.is_locked("test:charge:lock:o-9"));
    assert_eq!(h.system.stats().unwrap().failed(), 1);
}

#[tokio::test]
async fn configure_and_start_happen_once() {
    let h = harness(r#"[{ "name": "a" }, { "name": "b", "concurrency": 3 }]"#).await;

    let other_queue = MemoryBackend::new();
    let settings = JobsSettings::new("other", DefinitionSource::Json(r#"[{ "name": "c" }]"#.to_string()))
        .with_shutdown(ShutdownSettings::manual());
    h.system
        .configure_with_clients(settings, Clients::new(Arc::new(other_queue.clone()), Arc::new(MemoryLockService::new())))
        .await
        .unwrap();

    // First configuration still in force
    assert!(h.system.registry().unwrap().contains("a"));
    assert!(matches!(h.system.enqueue("c", Value::Null, Value::Null).await, Err(JobsError::UnknownJob(_))));
    let handle = h.system.enqueue("a", Value::Null, Value::Null).await.unwrap();
    assert_eq!(handle.queue, "test:a");
    assert_eq!(other_queue.pending_count("other:c"), 0);

    h.system.start_processing(noop_handlers(&["a", "b"])).await.unwrap();
    let again = h.system.start_processing(noop_handlers(&["a", "b"])).await;

    assert!(matches!(again, Err(JobsError::AlreadyProcessing)));
    let empty = h.system.start_processing(HandlerTable::new()).await;
    assert!(matches!(empty, Err(JobsError::AlreadyProcessing)));
    assert_eq!(h.queue.registered.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_registration_drains_started_consumers() {
    // Arrange: the second of three consumers cannot be registered
    let queue = CountingQueue {
        inner: MemoryBackend::with_poll_interval(Duration::from_millis(10)),
        refuse_registration: Some(2),
        ..CountingQueue::default()
    };
    let h = harness_with_queue(r#"[{ "name": "a" }, { "name": "b" }, { "name": "c" }]"#, queue).await;

    // Act
    let started = h.system.start_processing(noop_handlers(&["a", "b", "c"])).await;

    // Assert
    assert!(matches!(started, Err(JobsError::Persistence(_))));
    assert_eq!(h.queue.registered.load(Ordering::SeqCst), 2);
    assert_eq!(h.queue.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.system.state(), LifecycleState::Terminated);
    assert!(matches!(
        h.system.start_processing(noop_handlers(&["a", "b", "c"])).await,
        Err(JobsError::AlreadyProcessing)
    ));
    assert!(matches!(
        h.system.enqueue("a", Value::Null, Value::Null).await,
        Err(JobsError::Persistence(_))
    ));
}

#[tokio::test]
async fn repeated_shutdown_requests_drain_once() {
    let h = harness(r#"[{ "name": "slow" }]"#).await;

    let mut handlers = HandlerTable::new();
    handlers
        .register_fn("slow", |_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!("finished"))
        })
        .unwrap();
    h.system.start_processing(handlers).await.unwrap();

    let handle = h.system.enqueue("slow", Value::Null, json!({ "removeOnComplete": false })).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let remote = h.system.shutdown_handle();
    assert!(remote.request("first"));
    h.system.request_shutdown();
    assert!(!remote.request("third"));

    tokio::time::timeout(Duration::from_secs(6), h.system.wait_terminated())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.system.state(), LifecycleState::Terminated);
    assert_eq!(h.queue.shutdowns.load(Ordering::SeqCst), 1);

    // The in-flight item was allowed to finish
    let record = h.system.lookup(&handle.id).await.unwrap().unwrap();
    assert_eq!(record.result, Some(json!("finished")));

    // No new work is accepted afterwards
    assert!(matches!(
        h.system.enqueue("slow", Value::Null, Value::Null).await,
        Err(JobsError::Persistence(_))
    ));
}
