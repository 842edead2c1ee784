use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Requests the one-time graceful shutdown of a job system
///
/// Cloneable and usable from any thread; every request after the first
/// is coalesced into it.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask for shutdown. Returns `true` only for the request that took effect.
    pub fn request(&self, reason: &str) -> bool {
        let first = self.tx.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        });

        if first {
            info!("Shutdown requested: {}", reason);
        } else {
            debug!("Shutdown already requested, ignoring: {}", reason);
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

/// Resolve on SIGINT or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

tokio::task_local! {
    static CONTAINS_PANICS: ();
}

/// Poll `fut` with its panics marked as caught by the caller.
///
/// The panic hook ignores panics raised while `fut` is being polled; the
/// caller must catch them itself.
pub(crate) async fn contain_panics<F: Future>(fut: F) -> F::Output {
    CONTAINS_PANICS.scope((), fut).await
}

fn panic_is_contained() -> bool {
    CONTAINS_PANICS.try_with(|_| ()).is_ok()
}

/// Turn any uncaught panic in the process into a shutdown request.
///
/// The previously installed hook still runs first. Panics inside
/// [`contain_panics`] are left to their caller.
pub fn install_panic_hook(handle: ShutdownHandle) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        previous(panic_info);
        if panic_is_contained() {
            debug!("Panic caught by its caller: {}", panic_info);
            return;
        }
        error!("Panic detected: {}", panic_info);
        handle.request("panic");
    }));
}
