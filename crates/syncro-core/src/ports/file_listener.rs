//! File event listener port
//!
//! Listeners are invoked synchronously from the watcher task, in
//! registration order, for every classified local change. They must not
//! block: staging work for later is fine, transferring files is not.

use std::path::Path;

use crate::domain::EventKind;

/// Receives local change notifications from the watcher
pub trait IFileEventListener: Send + Sync {
    fn on_file_event(&self, kind: EventKind, path: &Path);
}
