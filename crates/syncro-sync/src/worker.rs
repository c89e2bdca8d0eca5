//! Bounded worker pool
//!
//! Each submitted [`ChangeEvent`] becomes one task that performs exactly one
//! transfer handler call. At most `max_workers` of them run at a time; the
//! rest wait on the semaphore. Failures are logged at the unit boundary and
//! never retried or re-staged.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use syncro_core::domain::{ChangeEvent, SyncError, SyncResult};
use syncro_core::ports::{IHandlerProvider, ITransferHandler};

pub struct WorkerPool {
    handlers: Arc<dyn IHandlerProvider>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    max_workers: usize,
}

impl WorkerPool {
    /// Creates a pool running at most `max_workers` units at once (at least one)
    pub fn new(handlers: Arc<dyn IHandlerProvider>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        info!(max_workers, "Creating worker pool");
        Self {
            handlers,
            permits: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            max_workers,
        }
    }

    /// Queues one unit of work
    ///
    /// # Errors
    /// [`SyncError::PoolClosed`] once [`close`](Self::close) has been called.
    pub fn submit(&self, event: ChangeEvent) -> SyncResult<()> {
        if self.tracker.is_closed() {
            return Err(SyncError::PoolClosed("worker pool"));
        }

        let handlers = Arc::clone(&self.handlers);
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            run_unit(handlers.handler(), event).await;
        });
        Ok(())
    }

    /// Stops accepting work; submitted units still run to completion
    pub fn close(&self) {
        if self.tracker.close() {
            info!(queued = self.tracker.len(), "Worker pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Waits until the pool is closed and every submitted unit has finished
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Units currently holding a worker slot
    pub fn active(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Units submitted and not yet finished, running or waiting
    pub fn queued(&self) -> usize {
        self.tracker.len()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

/// Performs the remote operation for one event
///
/// The remote name is always the local file's base name.
async fn run_unit(handler: Arc<dyn ITransferHandler>, event: ChangeEvent) {
    let kind = event.kind();
    let path = event.path();
    let Some(remote_name) = event.file_name() else {
        warn!(kind = %kind, path = %path.display(), "Event has no usable file name");
        return;
    };

    if !matches!(event, ChangeEvent::Deleted(_)) {
        if !path.exists() {
            error!(kind = %kind, path = %path.display(), "Local file not found, skipping");
            return;
        }
        if !path.is_file() {
            warn!(kind = %kind, path = %path.display(), "Not a regular file, skipping");
            return;
        }
    }

    debug!(kind = %kind, remote_name, handler = %handler.name(), "Worker starting");
    let result = match &event {
        ChangeEvent::Created(local) => handler.upload(local, remote_name).await,
        ChangeEvent::Modified(local) => handler.replace(local, remote_name).await,
        ChangeEvent::Deleted(_) => handler.delete(remote_name).await,
    };

    match result {
        Ok(true) => info!(kind = %kind, remote_name, "Change mirrored"),
        Ok(false) => warn!(kind = %kind, remote_name, "Remote operation reported failure"),
        Err(e) => error!(kind = %kind, remote_name, error = %e, "Error processing change"),
    }
}
