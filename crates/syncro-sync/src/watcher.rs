//! Local change watcher
//!
//! Wraps the `notify` crate to monitor one directory (not its
//! subdirectories), converting raw OS events into [`ChangeEvent`] values and
//! announcing each one to every registered listener.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  notify callback ──→ mpsc::channel ──→ FileWatcher::run ──→ listeners (in order)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use syncro_core::domain::ChangeEvent;
use syncro_core::ports::IFileEventListener;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches a single directory and announces changes to its listeners
///
/// ## Usage
///
/// ```ignore
/// let mut watcher = FileWatcher::new("syncro", vec![".DS_Store".into()], token.clone());
/// watcher.add_listener(coordinator);
/// watcher.run().await?; // returns once the token is cancelled
/// ```
pub struct FileWatcher {
    root: PathBuf,
    ignore: Vec<String>,
    listeners: Vec<Arc<dyn IFileEventListener>>,
    cancel: CancellationToken,
    watching: CancellationToken,
}

impl FileWatcher {
    /// Creates a watcher for `root` that drops files whose name is in `ignore`
    ///
    /// The watcher stops when `cancel` is cancelled or [`stop`](Self::stop)
    /// is called.
    pub fn new(root: impl Into<PathBuf>, ignore: Vec<String>, cancel: CancellationToken) -> Self {
        Self {
            root: root.into(),
            ignore,
            listeners: Vec::new(),
            cancel,
            watching: CancellationToken::new(),
        }
    }

    /// Uses `watching` as the registration signal instead of a private token
    pub fn with_watching(mut self, watching: CancellationToken) -> Self {
        self.watching = watching;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a listener; listeners are invoked in registration order
    pub fn add_listener(&mut self, listener: Arc<dyn IFileEventListener>) {
        self.listeners.push(listener);
    }

    /// Token cancelled once the directory is registered with the OS
    pub fn watching(&self) -> CancellationToken {
        self.watching.clone()
    }

    /// Requests the watch loop to exit
    pub fn stop(&self) {
        info!(root = %self.root.display(), "Stopping file watcher");
        self.cancel.cancel();
    }

    /// Watches until stopped
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the directory
    /// cannot be registered (missing, no permission), or if the notification
    /// stream ends unexpectedly. None of these are retried.
    pub async fn run(&self) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<notify::Event>(EVENT_CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(e) = event_tx.blocking_send(event) {
                        warn!(error = %e, "Failed to forward file event (receiver dropped)");
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        if let Err(e) = watcher.watch(&self.root, RecursiveMode::NonRecursive) {
            error!(root = %self.root.display(), error = %e, "Cannot register directory for watching");
            return Err(e).with_context(|| format!("Failed to watch {}", self.root.display()));
        }

        info!(root = %self.root.display(), listeners = self.listeners.len(), "Watching for local changes");
        self.watching.cancel();

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                event = event_rx.recv() => match event {
                    Some(event) => {
                        for change in map_notify_event(&event) {
                            self.announce(&change);
                        }
                    }
                    None => {
                        error!(root = %self.root.display(), "File event stream ended");
                        break Err(anyhow::anyhow!("file event stream ended"));
                    }
                },
            }
        };

        drop(watcher);
        info!(root = %self.root.display(), "File watcher stopped");
        result
    }

    fn is_ignored(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.ignore.iter().any(|ignored| ignored == name))
    }

    fn announce(&self, change: &ChangeEvent) {
        if self.is_ignored(change.path()) {
            debug!(path = %change.path().display(), "Ignoring file");
            return;
        }
        info!(kind = %change.kind(), path = %change.path().display(), "Local change detected");
        for listener in &self.listeners {
            listener.on_file_event(change.kind(), change.path());
        }
    }
}

// ============================================================================
// Event mapping - notify::Event → ChangeEvent
// ============================================================================

/// Converts a `notify::Event` into zero or more [`ChangeEvent`]s
///
/// - `Create(*)` → `Created`
/// - `Remove(*)` → `Deleted`
/// - `Modify(Name(Both))` with 2 paths → `Deleted(old)` then `Created(new)`
/// - `Modify(Name(From))` → `Deleted`, `Modify(Name(To))` → `Created`
/// - `Modify(Name(_))` otherwise → `Created` if the path exists, else `Deleted`
/// - other `Modify(*)` → `Modified`
///
/// Access events and events without paths produce nothing.
fn map_notify_event(event: &notify::Event) -> Vec<ChangeEvent> {
    let paths = &event.paths;
    let Some(first) = paths.first().cloned() else {
        return Vec::new();
    };

    match &event.kind {
        EventKind::Create(_) => vec![ChangeEvent::Created(first)],

        EventKind::Remove(_) => vec![ChangeEvent::Deleted(first)],

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            debug!(old = %first.display(), new = %paths[1].display(), "Mapped rename event");
            vec![
                ChangeEvent::Deleted(first),
                ChangeEvent::Created(paths[1].clone()),
            ]
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![ChangeEvent::Deleted(first)],

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![ChangeEvent::Created(first)],

        EventKind::Modify(ModifyKind::Name(_)) => {
            if first.exists() {
                vec![ChangeEvent::Created(first)]
            } else {
                vec![ChangeEvent::Deleted(first)]
            }
        }

        EventKind::Modify(_) => vec![ChangeEvent::Modified(first)],

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use syncro_core::domain::EventKind as ChangeKind;

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        notify::Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    struct Recording {
        tag: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, ChangeKind, PathBuf)>>>,
    }

    impl IFileEventListener for Recording {
        fn on_file_event(&self, kind: ChangeKind, path: &Path) {
            self.seen
                .lock()
                .unwrap()
                .push((self.tag, kind, path.to_path_buf()));
        }
    }

    #[test]
    fn test_map_create_modify_remove() {
        assert_eq!(
            map_notify_event(&event(EventKind::Create(CreateKind::File), &["/a.txt"])),
            vec![ChangeEvent::Created("/a.txt".into())]
        );
        assert_eq!(
            map_notify_event(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/a.txt"]
            )),
            vec![ChangeEvent::Modified("/a.txt".into())]
        );
        assert_eq!(
            map_notify_event(&event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                &["/a.txt"]
            )),
            vec![ChangeEvent::Modified("/a.txt".into())]
        );
        assert_eq!(
            map_notify_event(&event(EventKind::Remove(RemoveKind::File), &["/a.txt"])),
            vec![ChangeEvent::Deleted("/a.txt".into())]
        );
    }

    #[test]
    fn test_map_rename_becomes_delete_then_create() {
        let mapped = map_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/old.txt", "/new.txt"],
        ));
        assert_eq!(
            mapped,
            vec![
                ChangeEvent::Deleted("/old.txt".into()),
                ChangeEvent::Created("/new.txt".into()),
            ]
        );

        assert_eq!(
            map_notify_event(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &["/old.txt"]
            )),
            vec![ChangeEvent::Deleted("/old.txt".into())]
        );
        assert_eq!(
            map_notify_event(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &["/new.txt"]
            )),
            vec![ChangeEvent::Created("/new.txt".into())]
        );
    }

    #[test]
    fn test_map_ambiguous_rename_checks_existence() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("here.txt");
        std::fs::write(&present, b"x").unwrap();
        let absent = dir.path().join("gone.txt");

        let kind = EventKind::Modify(ModifyKind::Name(RenameMode::Any));
        assert_eq!(
            map_notify_event(&notify::Event {
                kind,
                paths: vec![present.clone()],
                attrs: Default::default(),
            }),
            vec![ChangeEvent::Created(present)]
        );
        assert_eq!(
            map_notify_event(&notify::Event {
                kind,
                paths: vec![absent.clone()],
                attrs: Default::default(),
            }),
            vec![ChangeEvent::Deleted(absent)]
        );
    }

    #[test]
    fn test_map_ignores_access_and_pathless_events() {
        assert!(map_notify_event(&event(EventKind::Access(AccessKind::Read), &["/a.txt"])).is_empty());
        assert!(map_notify_event(&event(EventKind::Create(CreateKind::File), &[])).is_empty());
    }

    #[test]
    fn test_listeners_called_in_order_and_ignore_list_applied() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut watcher = FileWatcher::new(
            "/watched",
            vec![".DS_Store".to_string()],
            CancellationToken::new(),
        );
        watcher.add_listener(Arc::new(Recording {
            tag: "first",
            seen: Arc::clone(&seen),
        }));
        watcher.add_listener(Arc::new(Recording {
            tag: "second",
            seen: Arc::clone(&seen),
        }));

        watcher.announce(&ChangeEvent::Created("/watched/.DS_Store".into()));
        watcher.announce(&ChangeEvent::Modified("/watched/a.txt".into()));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("first", ChangeKind::Modified, PathBuf::from("/watched/a.txt")),
                ("second", ChangeKind::Modified, PathBuf::from("/watched/a.txt")),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_directory_fails_registration() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FileWatcher::new(dir.path().join("missing"), Vec::new(), CancellationToken::new());
        assert!(watcher.run().await.is_err());
        assert!(!watcher.watching().is_cancelled());
    }

    #[tokio::test]
    async fn test_watch_reports_new_file_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut watcher = FileWatcher::new(dir.path(), Vec::new(), CancellationToken::new());
        watcher.add_listener(Arc::new(Recording {
            tag: "only",
            seen: Arc::clone(&seen),
        }));
        let watcher = Arc::new(watcher);

        let running = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.run().await })
        };
        watcher.watching().cancelled().await;

        let file = dir.path().join("new.txt");
        std::fs::write(&file, b"hello").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let found = seen
                .lock()
                .unwrap()
                .iter()
                .any(|(_, kind, path)| *kind == ChangeKind::Created && *path == file);
            if found || tokio::time::Instant::now() > deadline {
                assert!(found, "creation of {} was not reported", file.display());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        watcher.stop();
        running.await.unwrap().unwrap();
    }
}
