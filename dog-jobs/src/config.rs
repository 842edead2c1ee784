use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::memory::DEFAULT_POLL_INTERVAL;
use crate::{JobsError, JobsResult};

pub use crate::job::DefinitionSource;

/// Settings consumed by `JobSystem::configure`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSettings {
    /// Namespace for queue names and lock resources
    pub prefix: String,

    pub definitions: DefinitionSource,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub shutdown: ShutdownSettings,
}

/// In-memory queue tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// How often idle consumers look for delayed items that became due
    pub poll_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which lock service to connect to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum LockSettings {
    #[default]
    Memory,
    Redis { url: String },
}

/// What triggers shutdown and what happens after the drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Shut down on SIGINT / SIGTERM
    pub listen_for_signals: bool,

    /// Shut down on panics that nothing catches; handler panics only fail their item
    pub trap_panics: bool,

    /// End the process once terminated
    pub exit_process: bool,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            listen_for_signals: true,
            trap_panics: true,
            exit_process: true,
        }
    }
}

impl ShutdownSettings {
    /// Only explicit requests shut the system down, and the process keeps running
    pub fn manual() -> Self {
        Self {
            listen_for_signals: false,
            trap_panics: false,
            exit_process: false,
        }
    }
}

impl JobsSettings {
    pub fn new(prefix: impl Into<String>, definitions: DefinitionSource) -> Self {
        Self {
            prefix: prefix.into(),
            definitions,
            queue: QueueSettings::default(),
            lock: LockSettings::default(),
            shutdown: ShutdownSettings::default(),
        }
    }

    pub fn with_lock(mut self, lock: LockSettings) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_queue(mut self, queue: QueueSettings) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSettings) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Read settings from `JOBS_*` environment variables
    pub fn from_env() -> JobsResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> JobsResult<Self> {
        let prefix = var("JOBS_PREFIX").unwrap_or_else(|| "jobs".to_string());
        let definitions = var("JOBS_DEFINITIONS_PATH")
            .map(|path| DefinitionSource::Path(PathBuf::from(path)))
            .ok_or_else(|| JobsError::InvalidSettings("JOBS_DEFINITIONS_PATH is not set".to_string()))?;

        let lock = match var("JOBS_LOCK_BACKEND").unwrap_or_else(|| "memory".to_string()).as_str() {
            "memory" => LockSettings::Memory,
            "redis" => LockSettings::Redis {
                url: var("JOBS_REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            },
            other => return Err(JobsError::InvalidSettings(format!("unknown lock backend: {}", other))),
        };

        let default_poll = QueueSettings::default().poll_interval_ms;
        let poll_interval_ms = var("JOBS_QUEUE_POLL_INTERVAL_MS")
            .unwrap_or_else(|| default_poll.to_string())
            .parse()
            .unwrap_or(default_poll);

        let exit_process = var("JOBS_EXIT_ON_SHUTDOWN")
            .unwrap_or_else(|| "true".to_string())
            .parse()
            .unwrap_or(true);

        let settings = Self {
            prefix,
            definitions,
            queue: QueueSettings { poll_interval_ms },
            lock,
            shutdown: ShutdownSettings {
                exit_process,
                ..ShutdownSettings::default()
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> JobsResult<()> {
        if self.prefix.trim().is_empty() {
            return Err(JobsError::InvalidSettings("prefix must not be empty".to_string()));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(JobsError::InvalidSettings("queue poll interval must be positive".to_string()));
        }
        Ok(())
    }
}
