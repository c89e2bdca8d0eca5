//! Sync engine - wires the watcher, coordinator and worker pool together
//!
//! The engine owns the lifetime of the local side: it starts the dispatch
//! loop, runs the watcher on the caller's task, and when the watcher exits
//! (cancelled or failed) it stops the dispatch loop, which drains what is
//! pending and closes the worker pool. [`SyncEngine::run`] returns once every
//! submitted unit has finished.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use syncro_core::config::SyncConfig;
use syncro_core::ports::IHandlerProvider;

use crate::coordinator::EventCoordinator;
use crate::watcher::FileWatcher;
use crate::worker::WorkerPool;

pub struct SyncEngine {
    root: PathBuf,
    ignore: Vec<String>,
    coordinator: Arc<EventCoordinator>,
    workers: Arc<WorkerPool>,
    watching: CancellationToken,
}

impl SyncEngine {
    pub fn new(config: &SyncConfig, handlers: Arc<dyn IHandlerProvider>) -> Self {
        Self {
            root: config.root.clone(),
            ignore: config.ignore.clone(),
            coordinator: Arc::new(EventCoordinator::new(config.coalesce)),
            workers: Arc::new(WorkerPool::new(handlers, config.workers)),
            watching: CancellationToken::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn coordinator(&self) -> &Arc<EventCoordinator> {
        &self.coordinator
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    /// Token cancelled once the watched directory is registered
    pub fn watching(&self) -> CancellationToken {
        self.watching.clone()
    }

    /// Runs until `cancel` fires or the watcher fails
    ///
    /// # Errors
    /// Returns the watcher's error if the directory could not be watched.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(root = %self.root.display(), "Sync engine starting");

        let mut watcher = FileWatcher::new(&self.root, self.ignore.clone(), cancel.child_token())
            .with_watching(self.watching.clone());
        watcher.add_listener(Arc::clone(&self.coordinator) as _);

        let dispatch_stop = CancellationToken::new();
        let dispatcher = {
            let coordinator = Arc::clone(&self.coordinator);
            let workers = Arc::clone(&self.workers);
            let stop = dispatch_stop.clone();
            tokio::spawn(async move { coordinator.run(&workers, stop).await })
        };

        let watched = watcher.run().await;
        if let Err(e) = &watched {
            error!(error = %e, "File watcher exited with an error");
        }

        dispatch_stop.cancel();
        if let Err(e) = dispatcher.await {
            error!(error = %e, "Event coordinator task failed");
            self.workers.close();
        }

        info!(
            in_flight = self.workers.queued(),
            "Waiting for submitted transfers to finish"
        );
        self.workers.wait().await;

        info!("Sync engine stopped");
        watched
    }
}
