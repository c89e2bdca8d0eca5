//! Event coordinator - stages local changes and feeds the worker pool
//!
//! The coordinator sits between the [`FileWatcher`](crate::watcher::FileWatcher)
//! and the [`WorkerPool`]. Listener callbacks stage events into a concurrent
//! pending map; the dispatch loop wakes on every stage, drains everything
//! pending and submits one unit of work per entry.
//!
//! ## Coalescing
//!
//! Under [`CoalescePolicy::ByKind`] the map holds at most one file per event
//! kind: a second `Created` staged before the first is drained replaces it,
//! and the first file is never transferred. [`CoalescePolicy::ByFile`] keys
//! the map by kind and path instead, so only repeated events for the same
//! file collapse.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use syncro_core::config::CoalescePolicy;
use syncro_core::domain::{ChangeEvent, EventKind};
use syncro_core::ports::IFileEventListener;

use crate::worker::WorkerPool;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PendingKey {
    Kind(EventKind),
    File(EventKind, PathBuf),
}

impl PendingKey {
    fn kind(&self) -> EventKind {
        match self {
            PendingKey::Kind(kind) | PendingKey::File(kind, _) => *kind,
        }
    }
}

/// Pending-work map plus the loop that drains it
pub struct EventCoordinator {
    policy: CoalescePolicy,
    pending: DashMap<PendingKey, PathBuf>,
    wake: Notify,
}

impl EventCoordinator {
    pub fn new(policy: CoalescePolicy) -> Self {
        info!(policy = ?policy, "Creating event coordinator");
        Self {
            policy,
            pending: DashMap::new(),
            wake: Notify::new(),
        }
    }

    /// Records `path` as pending work for `kind` without blocking
    ///
    /// Overwrites whatever is pending under the same key.
    pub fn stage(&self, kind: EventKind, path: PathBuf) {
        let key = match self.policy {
            CoalescePolicy::ByKind => PendingKey::Kind(kind),
            CoalescePolicy::ByFile => PendingKey::File(kind, path.clone()),
        };

        match self.pending.insert(key, path.clone()) {
            Some(previous) if previous != path => warn!(
                kind = %kind,
                dropped = %previous.display(),
                kept = %path.display(),
                "Pending event replaced before dispatch"
            ),
            Some(_) => debug!(kind = %kind, path = %path.display(), "Pending event coalesced"),
            None => debug!(kind = %kind, path = %path.display(), "Event staged"),
        }

        self.wake.notify_one();
    }

    /// Number of entries waiting for dispatch
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns every pending entry
    pub fn drain(&self) -> Vec<ChangeEvent> {
        let keys: Vec<PendingKey> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .map(|(key, path)| ChangeEvent::new(key.kind(), path))
            .collect()
    }

    fn dispatch(&self, workers: &WorkerPool) -> usize {
        let events = self.drain();
        let count = events.len();
        for event in events {
            if let Err(e) = workers.submit(event.clone()) {
                warn!(kind = %event.kind(), path = %event.path().display(), error = %e, "Dropping event");
            }
        }
        count
    }

    /// Dispatches pending work until `stop` is cancelled
    ///
    /// On stop, whatever is still pending is dispatched one last time and
    /// the worker pool is closed. Already submitted work keeps running;
    /// callers wait for it with [`WorkerPool::wait`].
    pub async fn run(&self, workers: &WorkerPool, stop: CancellationToken) {
        info!("Event coordinator starting");

        loop {
            tokio::select! {
                _ = self.wake.notified() => {
                    let count = self.dispatch(workers);
                    if count > 0 {
                        debug!(count, "Dispatched pending events");
                    }
                }
                _ = stop.cancelled() => break,
            }
        }

        let remaining = self.dispatch(workers);
        if remaining > 0 {
            info!(count = remaining, "Dispatched remaining events before shutdown");
        }
        workers.close();
        info!("Event coordinator stopped");
    }
}

impl IFileEventListener for EventCoordinator {
    fn on_file_event(&self, kind: EventKind, path: &Path) {
        self.stage(kind, path.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use syncro_core::domain::SyncResult;
    use syncro_core::ports::{IHandlerProvider, ITransferHandler, VersionHistory};

    use super::*;

    fn sorted(mut events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        events.sort_by_key(|e| (e.kind(), e.path().to_path_buf()));
        events
    }

    #[test]
    fn test_by_kind_keeps_only_last_file_per_kind() {
        let coordinator = EventCoordinator::new(CoalescePolicy::ByKind);
        coordinator.stage(EventKind::Created, "/w/a.txt".into());
        coordinator.stage(EventKind::Created, "/w/b.txt".into());
        coordinator.stage(EventKind::Created, "/w/c.txt".into());
        coordinator.stage(EventKind::Deleted, "/w/a.txt".into());
        assert_eq!(coordinator.pending_len(), 2);

        assert_eq!(
            sorted(coordinator.drain()),
            vec![
                ChangeEvent::Created("/w/c.txt".into()),
                ChangeEvent::Deleted("/w/a.txt".into()),
            ]
        );
        assert_eq!(coordinator.pending_len(), 0);
        assert!(coordinator.drain().is_empty());
    }

    #[test]
    fn test_by_file_keeps_every_file() {
        let coordinator = EventCoordinator::new(CoalescePolicy::ByFile);
        coordinator.stage(EventKind::Modified, "/w/a.txt".into());
        coordinator.stage(EventKind::Modified, "/w/b.txt".into());
        coordinator.stage(EventKind::Modified, "/w/a.txt".into());

        assert_eq!(
            sorted(coordinator.drain()),
            vec![
                ChangeEvent::Modified("/w/a.txt".into()),
                ChangeEvent::Modified("/w/b.txt".into()),
            ]
        );
    }

    #[test]
    fn test_listener_callback_stages() {
        let coordinator = EventCoordinator::new(CoalescePolicy::ByKind);
        coordinator.on_file_event(EventKind::Modified, Path::new("/w/a.txt"));
        assert_eq!(
            coordinator.drain(),
            vec![ChangeEvent::Modified("/w/a.txt".into())]
        );
    }

    #[derive(Default)]
    struct Counting {
        uploads: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ITransferHandler for Counting {
        fn name(&self) -> String {
            "Counting".into()
        }

        async fn upload(&self, _local: &Path, remote_name: &str) -> SyncResult<bool> {
            self.uploads.lock().unwrap().push(remote_name.to_string());
            Ok(true)
        }

        async fn replace(&self, _local: &Path, _remote_name: &str) -> SyncResult<bool> {
            Ok(true)
        }

        async fn delete(&self, _remote_name: &str) -> SyncResult<bool> {
            Ok(true)
        }

        async fn list_files(&self, _remote_path: &str) -> SyncResult<Option<Vec<String>>> {
            Ok(None)
        }

        async fn download_file(&self, _remote_path: &str, _local: &Path) -> SyncResult<bool> {
            Ok(false)
        }

        async fn check_versions(&self, _original: &str) -> SyncResult<Option<VersionHistory>> {
            Ok(None)
        }
    }

    struct Provider(Arc<Counting>);

    impl IHandlerProvider for Provider {
        fn handler(&self) -> Arc<dyn ITransferHandler> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_run_dispatches_and_drains_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&first, b"1").unwrap();
        std::fs::write(&second, b"2").unwrap();

        let handler = Arc::new(Counting::default());
        let workers = Arc::new(WorkerPool::new(Arc::new(Provider(Arc::clone(&handler))), 2));
        let coordinator = Arc::new(EventCoordinator::new(CoalescePolicy::ByKind));
        let stop = CancellationToken::new();

        let running = {
            let coordinator = Arc::clone(&coordinator);
            let workers = Arc::clone(&workers);
            let stop = stop.clone();
            tokio::spawn(async move { coordinator.run(&workers, stop).await })
        };

        coordinator.stage(EventKind::Created, first);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while handler.uploads.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "first event never dispatched");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        stop.cancel();
        coordinator.stage(EventKind::Created, second);
        running.await.unwrap();
        workers.wait().await;

        let uploads = handler.uploads.lock().unwrap().clone();
        assert_eq!(uploads[0], "first.txt");
        assert_eq!(uploads.len(), 2, "event staged at shutdown should be drained");
        assert!(workers.submit(ChangeEvent::Deleted("/w/x".into())).is_err());
    }
}
