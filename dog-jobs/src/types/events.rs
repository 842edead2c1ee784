use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Item lifecycle events emitted by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Item was persisted
    Enqueued {
        job_id: JobId,
        queue: String,
        at: DateTime<Utc>,
    },

    /// Item was delivered to a consumer
    Started {
        job_id: JobId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// Handler reported progress
    Progress {
        job_id: JobId,
        percent: u8,
        at: DateTime<Utc>,
    },

    /// Attempt failed, another one is scheduled
    Retrying {
        job_id: JobId,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Item completed successfully
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Item failed permanently
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Get the item ID from any event
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }
}
