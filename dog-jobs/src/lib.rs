//! # dog-jobs: Job Orchestration over a Shared Queue
//!
//! dog-jobs turns a JSON catalog of job definitions into running background
//! work. It sits on top of two external services, a work queue and a lock
//! service, and adds:
//!
//! - **Definition catalog**: named job types with concurrency, default data,
//!   queue options, timeouts and an optional uniqueness key
//! - **Merged enqueue**: submitted data and option overrides are layered over
//!   the definition's defaults before the item is persisted
//! - **Lock-guarded execution**: items sharing a unique value never run their
//!   handler at the same time
//! - **Graceful shutdown**: one drain-then-exit sequence, whatever triggers it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_jobs::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> JobsResult<()> {
//! let catalog = r#"[
//!     { "name": "send_email", "concurrency": 4, "default": { "from": "noreply" } },
//!     { "name": "rebuild_index", "timeout": 30000, "uniqueKey": "index" }
//! ]"#;
//!
//! let system = JobSystem::new();
//! system
//!     .configure(JobsSettings::new("app", DefinitionSource::Json(catalog.to_string())))
//!     .await?;
//!
//! let mut handlers = HandlerTable::new();
//! handlers.register_fn("send_email", |ctx: JobContext| async move {
//!     ctx.log(format!("sending to {:?}", ctx.get("to")));
//!     Ok(json!({ "sent": true }))
//! })?;
//! handlers.register_fn("rebuild_index", |ctx: JobContext| async move {
//!     ctx.progress(1, 1);
//!     Ok(serde_json::Value::Null)
//! })?;
//!
//! system.start_processing(handlers).await?;
//! system.enqueue("send_email", json!({ "to": "ops@example.com" }), json!({ "attempts": 3 })).await?;
//!
//! system.wait_terminated().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod enqueue;
pub mod error;
pub mod execution;
pub mod job;
pub mod lifecycle;
pub mod lock;
pub mod observability;
pub mod types;

pub use types::{
    Backoff, ItemHandle, ItemRecord, ItemStatus, JobEvent, JobId, JobPriority, LockToken, NewItem,
};
pub use error::{JobError, JobsError, JobsResult};
pub use config::{DefinitionSource, JobsSettings, LockSettings, QueueSettings, ShutdownSettings};
pub use job::{HandlerTable, JobContext, JobDefinition, JobHandler, JobRegistry};
pub use backend::{ItemConsumer, QueueBackend};
pub use backend::memory::MemoryBackend;
pub use lock::{LockCoordinator, LockService};
pub use lock::memory::MemoryLockService;
pub use lifecycle::{Clients, JobSystem, LifecycleState, ShutdownHandle, SHUTDOWN_GRACE_PERIOD};
pub use observability::{JobStats, StatsSnapshot};

#[cfg(feature = "redis")]
pub use lock::redis::RedisLockService;

/// Everything needed to define, enqueue and handle jobs
pub mod prelude {
    pub use crate::{JobSystem, JobsSettings, DefinitionSource, ShutdownSettings};

    pub use crate::{HandlerTable, JobContext, JobHandler, JobDefinition};

    pub use crate::{JobError, JobsError, JobsResult, JobId, ItemHandle};

    pub use async_trait::async_trait;
}
