//! Lifecycle controller: one-time configuration, processing start, and the
//! single graceful shutdown.

pub mod shutdown;

pub use shutdown::{install_panic_hook, shutdown_signal, ShutdownHandle};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, info, instrument};

use crate::backend::memory::MemoryBackend;
use crate::backend::QueueBackend;
use crate::config::{JobsSettings, LockSettings, ShutdownSettings};
use crate::dispatch::{validate_handlers, Dispatcher};
use crate::enqueue::Enqueuer;
use crate::execution::JobExecutor;
use crate::job::{HandlerTable, JobRegistry};
use crate::lock::memory::MemoryLockService;
use crate::lock::{LockCoordinator, LockService};
use crate::observability::JobStats;
use crate::{ItemHandle, ItemRecord, JobId, JobsError, JobsResult};

/// How long in-flight items get to finish once shutdown starts
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Processing,
    ShuttingDown,
    Terminated,
}

/// Queue and lock clients shared by every component
#[derive(Clone)]
pub struct Clients {
    pub queue: Arc<dyn QueueBackend>,
    pub locks: Arc<dyn LockService>,
}

impl Clients {
    pub fn new(queue: Arc<dyn QueueBackend>, locks: Arc<dyn LockService>) -> Self {
        Self { queue, locks }
    }

    /// Build the clients named by `settings`
    pub async fn connect(settings: &JobsSettings) -> JobsResult<Self> {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::with_poll_interval(settings.queue.poll_interval()));

        let locks: Arc<dyn LockService> = match &settings.lock {
            LockSettings::Memory => Arc::new(MemoryLockService::new()),
            #[cfg(feature = "redis")]
            LockSettings::Redis { url } => Arc::new(crate::lock::redis::RedisLockService::connect(url).await?),
            #[cfg(not(feature = "redis"))]
            LockSettings::Redis { .. } => {
                return Err(JobsError::InvalidSettings(
                    "the redis lock backend requires the `redis` feature".to_string(),
                ))
            }
        };

        Ok(Self { queue, locks })
    }
}

/// Everything built by a successful configure
struct JobsContext {
    prefix: String,
    shutdown: ShutdownSettings,
    registry: Arc<JobRegistry>,
    clients: Clients,
    enqueuer: Enqueuer,
    stats: Arc<JobStats>,
}

/// Owns the configured context and the process lifecycle
pub struct JobSystem {
    context: OnceCell<Arc<JobsContext>>,
    processing: AtomicBool,
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: ShutdownHandle,
}

impl Default for JobSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSystem {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Unconfigured);
        Self {
            context: OnceCell::new(),
            processing: AtomicBool::new(false),
            state: Arc::new(state),
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Configure from settings. Calls after the first successful one do nothing.
    pub async fn configure(&self, settings: JobsSettings) -> JobsResult<()> {
        self.configure_inner(settings, None).await
    }

    /// Configure with caller-supplied queue and lock clients
    pub async fn configure_with_clients(&self, settings: JobsSettings, clients: Clients) -> JobsResult<()> {
        self.configure_inner(settings, Some(clients)).await
    }

    async fn configure_inner(&self, settings: JobsSettings, clients: Option<Clients>) -> JobsResult<()> {
        if self.context.initialized() {
            debug!("Job system already configured, ignoring configure");
            return Ok(());
        }

        self.context
            .get_or_try_init(|| async move {
                settings.validate()?;

                let clients = match clients {
                    Some(clients) => clients,
                    None => Clients::connect(&settings).await?,
                };
                let registry = Arc::new(JobRegistry::load(&settings.definitions).await?);
                let stats = Arc::new(JobStats::new());
                let enqueuer = Enqueuer::new(registry.clone(), clients.queue.clone(), settings.prefix.clone(), stats.clone());

                info!(
                    "Job system configured with prefix {} and {} job types",
                    settings.prefix,
                    registry.len()
                );

                Ok::<_, JobsError>(Arc::new(JobsContext {
                    prefix: settings.prefix,
                    shutdown: settings.shutdown,
                    registry,
                    clients,
                    enqueuer,
                    stats,
                }))
            })
            .await?;

        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Unconfigured {
                *state = LifecycleState::Configured;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    fn context(&self) -> JobsResult<&Arc<JobsContext>> {
        self.context.get().ok_or(JobsError::NotConfigured)
    }

    /// Enqueue one item of `job_name`; `data` and `overrides` are JSON objects or null
    pub async fn enqueue(&self, job_name: &str, data: Value, overrides: Value) -> JobsResult<ItemHandle> {
        self.context()?.enqueuer.enqueue(job_name, data, overrides).await
    }

    /// Bind every job type to its handler and start consuming.
    ///
    /// Allowed once. Also arms the shutdown triggers enabled in settings.
    /// A queue error while registering consumers drains the system.
    #[instrument(skip(self, handlers))]
    pub async fn start_processing(&self, handlers: HandlerTable) -> JobsResult<()> {
        let ctx = self.context()?.clone();
        if self.processing.load(Ordering::SeqCst) {
            return Err(JobsError::AlreadyProcessing);
        }
        validate_handlers(&ctx.registry, &handlers)?;

        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JobsError::AlreadyProcessing);
        }

        let executor = Arc::new(JobExecutor::new(
            ctx.registry.clone(),
            Arc::new(handlers),
            LockCoordinator::new(ctx.clients.locks.clone(), ctx.prefix.clone()),
            ctx.stats.clone(),
        ));
        let dispatcher = Dispatcher::new(ctx.clients.queue.clone(), executor, ctx.prefix.clone());
        let registered = match dispatcher.register_all(&ctx.registry).await {
            Ok(registered) => registered,
            Err(e) => {
                // Consumers registered so far must not outlive the failed start
                error!("Consumer registration failed: {}", e);
                self.shutdown.request("consumer registration failed");
                coordinate_shutdown(ctx.clients.queue.clone(), self.shutdown.clone(), self.state.clone(), false).await;
                return Err(e);
            }
        };

        if ctx.shutdown.trap_panics {
            install_panic_hook(self.shutdown.clone());
        }
        if ctx.shutdown.listen_for_signals {
            let handle = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown_signal() => {
                        handle.request("termination signal");
                    }
                    _ = handle.requested() => {}
                }
            });
        }

        self.state.send_replace(LifecycleState::Processing);
        tokio::spawn(coordinate_shutdown(
            ctx.clients.queue.clone(),
            self.shutdown.clone(),
            self.state.clone(),
            ctx.shutdown.exit_process,
        ));

        info!("Processing started with {} consumers", registered);
        Ok(())
    }

    /// Look up a persisted item
    pub async fn lookup(&self, id: &JobId) -> JobsResult<Option<ItemRecord>> {
        self.context()?.clients.queue.lookup(id).await
    }

    pub fn registry(&self) -> JobsResult<Arc<JobRegistry>> {
        Ok(self.context()?.registry.clone())
    }

    pub fn stats(&self) -> JobsResult<Arc<JobStats>> {
        Ok(self.context()?.stats.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.context.initialized()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Handle for requesting shutdown from elsewhere in the process
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Request shutdown. It runs once processing has started.
    pub fn request_shutdown(&self) {
        self.shutdown.request("shutdown requested by caller");
    }

    /// Resolve once the system has terminated
    pub async fn wait_terminated(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == LifecycleState::Terminated).await;
    }
}

async fn coordinate_shutdown(
    queue: Arc<dyn QueueBackend>,
    shutdown: ShutdownHandle,
    state: Arc<watch::Sender<LifecycleState>>,
    exit_process: bool,
) {
    shutdown.requested().await;
    state.send_replace(LifecycleState::ShuttingDown);
    info!("Shutting down, draining in-flight items for up to {:?}", SHUTDOWN_GRACE_PERIOD);

    if let Err(e) = queue.shutdown(SHUTDOWN_GRACE_PERIOD).await {
        error!("Queue shutdown failed: {}", e);
    }

    state.send_replace(LifecycleState::Terminated);
    info!("Job system terminated");

    if exit_process {
        std::process::exit(0);
    }
}
