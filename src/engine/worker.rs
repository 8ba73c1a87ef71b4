use crate::core::CounterError;
use crate::engine::EngineShared;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error};

/// Handle to the background persistence task.
pub struct PersistWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl PersistWorker {
    fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Stops the loop and waits for it, letting a persist already in
    /// progress (retries included) run to completion.
    ///
    /// A task that died is logged; the caller still owns the final flush.
    pub async fn stop(mut self) {
        self.signal_stop();
        let Some(join_handle) = self.join_handle.take() else {
            return;
        };
        if let Err(err) = join_handle.await {
            error!(error = %CounterError::from(err), "Background persistence task failed");
        }
    }
}

impl Drop for PersistWorker {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the timer loop that persists the counter whenever it is dirty.
pub(crate) fn spawn_persist_worker(shared: Arc<EngineShared>) -> PersistWorker {
    let interval = shared.config.persist_interval;
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "Starting background persistence");
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    debug!("Background persistence stopping");
                    break;
                }
                _ = sleep(interval) => {
                    if shared.counter.is_dirty() {
                        debug!("Performing scheduled counter persistence");
                        if let Err(err) = shared.persist().await {
                            error!(error = %err, "Failed to persist counter in background");
                        }
                    }
                }
            }
        }
    });

    PersistWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
