use std::sync::Arc;

use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, info, instrument};

use super::storage::MemoryBackend;
use crate::backend::ItemConsumer;

/// Consumer loop for one queue
///
/// Takes a permit per delivery so at most `concurrency` items run at once,
/// and stops taking new items as soon as shutdown is signalled.
#[instrument(skip_all, fields(queue = %queue))]
pub(crate) async fn run(
    backend: MemoryBackend,
    queue: String,
    consumer: Arc<dyn ItemConsumer>,
    permits: Arc<Semaphore>,
    waker: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        if *shutdown.borrow() {
            break;
        }

        match backend.take_next(&queue) {
            Some(record) => {
                debug!("Delivering item {} (attempt {})", record.id, record.attempt);
                let backend = backend.clone();
                let consumer = consumer.clone();
                tokio::spawn(async move {
                    backend.process(record, consumer).await;
                    drop(permit);
                });
            }
            None => {
                drop(permit);
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = waker.notified() => {}
                    _ = tokio::time::sleep(backend.poll_interval) => {}
                }
            }
        }
    }

    info!("Consumer stopped");
}
