//! Enqueue engine: merge definition defaults with submitted data and options,
//! then persist one item on the job's queue.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::backend::QueueBackend;
use crate::job::{JobDefinition, JobRegistry};
use crate::observability::JobStats;
use crate::types::{ItemOptions, RECOGNIZED_OPTIONS};
use crate::{ItemHandle, JobsError, JobsResult, NewItem};

/// Copy `base` and overwrite it with every top-level key of `overlay`
pub fn merge_shallow(base: Option<&Map<String, Value>>, overlay: Map<String, Value>) -> Map<String, Value> {
    match base {
        Some(base) => {
            let mut merged = base.clone();
            merged.extend(overlay);
            merged
        }
        None => overlay,
    }
}

fn as_object(job: &str, what: &str, value: Value) -> JobsResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(JobsError::InvalidInput {
            job: job.to_string(),
            reason: format!("{} must be an object, got {}", what, other),
        }),
    }
}

/// Build the queue item for one enqueue call without persisting it
pub fn build_item(
    prefix: &str,
    definition: &JobDefinition,
    data: Value,
    overrides: Value,
) -> JobsResult<NewItem> {
    let data = merge_shallow(
        definition.default_params.as_ref(),
        as_object(&definition.name, "job data", data)?,
    );
    let options = merge_shallow(
        definition.options.as_ref(),
        as_object(&definition.name, "override options", overrides)?,
    );

    let parsed = ItemOptions::from_map(&options).map_err(|reason| JobsError::InvalidInput {
        job: definition.name.clone(),
        reason,
    })?;

    let mut item = NewItem::new(definition.queue_name(prefix), data)
        .with_remove_on_complete(parsed.remove_on_complete);

    if let Some(attempts) = parsed.attempts {
        item = item.with_attempts(attempts);
    }
    if let Some(priority) = parsed.priority {
        item = item.with_priority(priority);
    }
    if let Some(timeout) = definition.timeout() {
        item = item.with_max_duration(timeout);
    }
    if let Some(backoff) = parsed.backoff {
        item = item.with_backoff(backoff);
    }

    let extra: Map<String, Value> = options
        .into_iter()
        .filter(|(key, _)| !RECOGNIZED_OPTIONS.contains(&key.as_str()))
        .collect();

    Ok(item.with_extra_options(extra))
}

/// Turns `(job name, data, overrides)` into persisted queue items
#[derive(Clone)]
pub struct Enqueuer {
    registry: Arc<JobRegistry>,
    queue: Arc<dyn QueueBackend>,
    prefix: String,
    stats: Arc<JobStats>,
}

impl Enqueuer {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue: Arc<dyn QueueBackend>,
        prefix: impl Into<String>,
        stats: Arc<JobStats>,
    ) -> Self {
        Self {
            registry,
            queue,
            prefix: prefix.into(),
            stats,
        }
    }

    /// Enqueue one item of `job_name`.
    ///
    /// Unknown names and malformed input fail before the queue is touched.
    #[instrument(skip(self, data, overrides), fields(job = %job_name))]
    pub async fn enqueue(&self, job_name: &str, data: Value, overrides: Value) -> JobsResult<ItemHandle> {
        let definition = self.registry.get(job_name)?;
        let item = build_item(&self.prefix, definition, data, overrides)?;

        let handle = self.queue.persist(item).await?;
        self.stats.record_enqueued(job_name);

        debug!("Enqueued {} item {} on {}", job_name, handle.id, handle.queue);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::types::{Backoff, JobPriority};
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn submitted_data_wins_over_defaults() {
        let definition = JobDefinition::new("report").with_default_params(map(json!({ "a": 1, "b": 2 })));

        let item = build_item("q", &definition, json!({ "b": 3 }), Value::Null).unwrap();

        assert_eq!(item.queue, "q:report");
        assert_eq!(Value::Object(item.data), json!({ "a": 1, "b": 3 }));
    }

    #[test]
    fn data_is_verbatim_without_defaults() {
        let definition = JobDefinition::new("report");
        let item = build_item("q", &definition, json!({ "nested": { "x": 1 } }), json!({})).unwrap();
        assert_eq!(Value::Object(item.data), json!({ "nested": { "x": 1 } }));
    }

    #[test]
    fn merge_is_shallow() {
        let definition = JobDefinition::new("report").with_default_params(map(json!({ "cfg": { "a": 1, "b": 2 } })));
        let item = build_item("q", &definition, json!({ "cfg": { "b": 3 } }), Value::Null).unwrap();
        assert_eq!(Value::Object(item.data), json!({ "cfg": { "b": 3 } }));
    }

    #[test]
    fn override_attempts_win_over_definition() {
        let definition = JobDefinition::new("sync").with_options(map(json!({ "attempts": 3 })));

        let overridden = build_item("q", &definition, Value::Null, json!({ "attempts": 5 })).unwrap();
        assert_eq!(overridden.attempts, Some(5));

        let inherited = build_item("q", &definition, Value::Null, json!({})).unwrap();
        assert_eq!(inherited.attempts, Some(3));
    }

    #[test]
    fn absent_options_keep_queue_defaults() {
        let item = build_item("q", &JobDefinition::new("sync"), Value::Null, Value::Null).unwrap();

        assert!(item.remove_on_complete);
        assert_eq!(item.attempts, None);
        assert_eq!(item.priority, None);
        assert_eq!(item.max_duration, None);
        assert_eq!(item.backoff, None);
    }

    #[test]
    fn recognized_options_are_applied() {
        let definition = JobDefinition::new("sync")
            .with_timeout(Duration::from_millis(750))
            .with_options(map(json!({ "removeOnComplete": false, "backoff": true })));

        let item = build_item("q", &definition, Value::Null, json!({ "priority": "high", "attempts": 0 })).unwrap();

        assert!(!item.remove_on_complete);
        assert_eq!(item.attempts, None);
        assert_eq!(item.priority, Some(JobPriority::High));
        assert_eq!(item.max_duration, Some(Duration::from_millis(750)));
        assert_eq!(item.backoff, Some(Backoff::Exponential { delay: Duration::from_secs(1) }));
    }

    #[test]
    fn unrecognized_options_are_carried() {
        let definition = JobDefinition::new("sync").with_options(map(json!({ "lifo": true, "attempts": 2 })));
        let item = build_item("q", &definition, Value::Null, json!({ "jobId": "fixed" })).unwrap();
        assert_eq!(Value::Object(item.extra_options), json!({ "lifo": true, "jobId": "fixed" }));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let definition = JobDefinition::new("sync");

        let bad_attempts = build_item("q", &definition, Value::Null, json!({ "attempts": "x" }));
        assert!(matches!(bad_attempts, Err(JobsError::InvalidInput { job, .. }) if job == "sync"));

        let bad_data = build_item("q", &definition, json!([1, 2]), Value::Null);
        assert!(matches!(bad_data, Err(JobsError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn unknown_job_touches_nothing() {
        let queue = MemoryBackend::new();
        let registry = Arc::new(JobRegistry::from_definitions(vec![JobDefinition::new("known")]).unwrap());
        let stats = Arc::new(JobStats::new());
        let enqueuer = Enqueuer::new(registry, Arc::new(queue.clone()), "q", stats.clone());

        let result = enqueuer.enqueue("missing", json!({}), Value::Null).await;

        assert!(matches!(result, Err(JobsError::UnknownJob(name)) if name == "missing"));
        assert_eq!(queue.pending_count("q:missing"), 0);
        assert_eq!(stats.enqueued(), 0);
    }

    #[tokio::test]
    async fn enqueue_persists_merged_item() {
        let queue = MemoryBackend::new();
        let registry = Arc::new(
            JobRegistry::from_definitions(vec![
                JobDefinition::new("report").with_default_params(map(json!({ "a": 1, "b": 2 })))
            ])
            .unwrap(),
        );
        let stats = Arc::new(JobStats::new());
        let enqueuer = Enqueuer::new(registry, Arc::new(queue.clone()), "q", stats.clone());

        let handle = enqueuer.enqueue("report", json!({ "b": 3 }), Value::Null).await.unwrap();

        let record = queue.lookup(&handle.id).await.unwrap().unwrap();
        assert_eq!(Value::Object(record.item.data), json!({ "a": 1, "b": 3 }));
        assert_eq!(handle.queue, "q:report");
        assert_eq!(queue.pending_count("q:report"), 1);
        assert_eq!(stats.job_type("report").unwrap().enqueued, 1);
    }

    proptest! {
        #[test]
        fn every_submitted_key_survives_the_merge(
            defaults in proptest::collection::btree_map("[a-e]", 0i64..100, 0..5),
            submitted in proptest::collection::btree_map("[a-e]", 100i64..200, 0..5),
        ) {
            let base: Map<String, Value> = defaults.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let overlay: Map<String, Value> = submitted.iter().map(|(k, v)| (k.clone(), json!(v))).collect();

            let merged = merge_shallow(Some(&base), overlay);

            for (key, value) in &submitted {
                prop_assert_eq!(&merged[key], &json!(value));
            }
            for (key, value) in &defaults {
                if !submitted.contains_key(key) {
                    prop_assert_eq!(&merged[key], &json!(value));
                }
            }
        }
    }
}
