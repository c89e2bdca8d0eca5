//! Change events
//!
//! A [`ChangeEvent`] is what the local watcher announces and what the event
//! coordinator stages for the worker pool. Events are ephemeral and never
//! persisted.

use std::fmt;
use std::path::{Path, PathBuf};

/// The three kinds of local change that are mirrored to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A new file appeared in the watched directory
    Created,
    /// An existing file's content or metadata changed
    Modified,
    /// A file disappeared from the watched directory
    Deleted,
}

impl EventKind {
    /// Every event kind, in a stable order
    pub const ALL: [EventKind; 3] = [EventKind::Created, EventKind::Modified, EventKind::Deleted];

    /// Returns the upper-case label used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "CREATE",
            EventKind::Modified => "MODIFY",
            EventKind::Deleted => "DELETE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a filesystem change detected by the watcher
///
/// Decoupled from the `notify` crate's raw event types so the coordinator
/// and workers can be exercised without an OS watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    /// A new file was created at the given path
    Created(PathBuf),
    /// An existing file was modified
    Modified(PathBuf),
    /// A file was deleted from the given path
    Deleted(PathBuf),
}

impl ChangeEvent {
    /// Builds an event of the given kind for `path`
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match kind {
            EventKind::Created => ChangeEvent::Created(path),
            EventKind::Modified => ChangeEvent::Modified(path),
            EventKind::Deleted => ChangeEvent::Deleted(path),
        }
    }

    /// Returns the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Created(_) => EventKind::Created,
            ChangeEvent::Modified(_) => EventKind::Modified,
            ChangeEvent::Deleted(_) => EventKind::Deleted,
        }
    }

    /// Returns the local path associated with this event
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Deleted(p) => p,
        }
    }

    /// Returns the basename of the path, which doubles as the remote name
    ///
    /// `None` when the path has no final component or is not valid UTF-8.
    pub fn file_name(&self) -> Option<&str> {
        self.path().file_name().and_then(|name| name.to_str())
    }
}
