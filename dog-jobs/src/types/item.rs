use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::{Backoff, JobId, JobPriority};

/// Item submission - built fluently, then handed to the queue to persist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    /// Namespaced queue name (`prefix:jobName`)
    pub queue: String,

    /// Job data handed to the handler
    pub data: Map<String, Value>,

    /// Drop the item once it completes
    pub remove_on_complete: bool,

    /// Total attempts the queue may make (queue default when absent)
    pub attempts: Option<u32>,

    /// Ordering hint (queue default when absent)
    pub priority: Option<JobPriority>,

    /// Maximum processing time of one attempt
    pub max_duration: Option<Duration>,

    /// Delay policy between attempts
    pub backoff: Option<Backoff>,

    /// Option keys the orchestration layer does not interpret
    #[serde(default)]
    pub extra_options: Map<String, Value>,
}

impl NewItem {
    /// Create a new item for the given queue
    pub fn new(queue: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            queue: queue.into(),
            data,
            remove_on_complete: false,
            attempts: None,
            priority: None,
            max_duration: None,
            backoff: None,
            extra_options: Map::new(),
        }
    }

    /// Set the completion-retention policy
    pub fn with_remove_on_complete(mut self, remove: bool) -> Self {
        self.remove_on_complete = remove;
        self
    }

    /// Set the total number of attempts
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the item priority
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the maximum processing time
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Set the retry-delay policy
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Carry options through to the queue untouched
    pub fn with_extra_options(mut self, options: Map<String, Value>) -> Self {
        self.extra_options = options;
        self
    }
}

/// Handle to a persisted item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHandle {
    pub id: JobId,
    pub queue: String,
    pub created_at: DateTime<Utc>,
}

/// Item status lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Waiting for a consumer
    Waiting,

    /// Failed an attempt and waits for its retry time
    Delayed { retry_at: DateTime<Utc> },

    /// Delivered to a consumer
    Active { started_at: DateTime<Utc> },

    /// Completed successfully
    Completed { completed_at: DateTime<Utc> },

    /// Failed with no attempts left (or a permanent error)
    Failed { failed_at: DateTime<Utc>, error: String },
}

impl ItemStatus {
    /// Check if the item is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Check if the item can be delivered at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Waiting => true,
            Self::Delayed { retry_at } => *retry_at <= now,
            _ => false,
        }
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed { .. } => "delayed",
            Self::Active { .. } => "active",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Item record - runtime state kept by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: JobId,
    pub item: NewItem,
    pub status: ItemStatus,

    /// Attempts started so far
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub result: Option<Value>,

    /// Last reported progress, 0-100
    pub progress: u8,

    /// Lines written through the item's log callback
    pub logs: Vec<String>,
}

impl ItemRecord {
    /// Create a new waiting record
    pub fn new(id: JobId, item: NewItem) -> Self {
        let now = Utc::now();
        Self {
            id,
            item,
            status: ItemStatus::Waiting,
            attempt: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
            result: None,
            progress: 0,
            logs: Vec::new(),
        }
    }

    /// Handle describing this record
    pub fn handle(&self) -> ItemHandle {
        ItemHandle {
            id: self.id.clone(),
            queue: self.item.queue.clone(),
            created_at: self.created_at,
        }
    }

    /// Total attempts allowed; one when the item does not say otherwise
    pub fn max_attempts(&self) -> u32 {
        self.item.attempts.unwrap_or(1)
    }

    /// Check if another attempt may be scheduled
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts()
    }

    /// Start a new attempt
    pub fn start_attempt(&mut self) {
        let now = Utc::now();
        self.attempt += 1;
        self.status = ItemStatus::Active { started_at: now };
        self.updated_at = now;
    }

    /// Complete the item successfully
    pub fn complete(&mut self, result: Value) {
        let now = Utc::now();
        self.status = ItemStatus::Completed { completed_at: now };
        self.result = Some(result);
        self.progress = 100;
        self.updated_at = now;
    }

    /// Fail the item permanently
    pub fn fail(&mut self, error: String) {
        let now = Utc::now();
        self.status = ItemStatus::Failed { failed_at: now, error: error.clone() };
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Schedule a retry
    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>, error: String) {
        self.status = ItemStatus::Delayed { retry_at };
        self.last_error = Some(error);
        self.updated_at = Utc::now();
    }
}
