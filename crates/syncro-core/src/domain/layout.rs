//! Remote layout shared by the connection pool and the transfer handlers
//!
//! The working root is whatever directory the server puts a fresh session
//! in; it is only known after the first login, so it is discovered once at
//! startup and then read by every release (cursor reset) and every handler
//! call. The history directory holds archived copies made by `replace`.

use std::sync::{PoisonError, RwLock};

/// Joins a remote directory and a name with `/`
///
/// An empty directory means "relative to the current cursor".
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Working root and history directory on the remote server
#[derive(Debug)]
pub struct RemoteLayout {
    work_dir: RwLock<String>,
    history_dir: RwLock<String>,
}

impl RemoteLayout {
    /// Creates a layout with an unknown working root and the given history
    /// directory (relative to the root until [`set_history_dir`] is called)
    ///
    /// [`set_history_dir`]: RemoteLayout::set_history_dir
    pub fn new(history_dir: impl Into<String>) -> Self {
        Self {
            work_dir: RwLock::new(String::new()),
            history_dir: RwLock::new(history_dir.into()),
        }
    }

    /// The working root; empty until discovered
    pub fn work_dir(&self) -> String {
        self.work_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_work_dir(&self, dir: impl Into<String>) {
        *self.work_dir.write().unwrap_or_else(PoisonError::into_inner) = dir.into();
    }

    /// The history directory, absolute once discovered
    pub fn history_dir(&self) -> String {
        self.history_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_history_dir(&self, dir: impl Into<String>) {
        *self
            .history_dir
            .write()
            .unwrap_or_else(PoisonError::into_inner) = dir.into();
    }

    /// Path of an archived copy inside the history directory
    pub fn history_path(&self, history_name: &str) -> String {
        remote_join(&self.history_dir(), history_name)
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self::new("history")
    }
}
