//! In-process remote store
//!
//! [`MemoryStore`] keeps a directory tree of byte blobs behind a mutex and
//! hands out [`MemorySession`]s that implement the session port with the
//! same cursor semantics as an FTP server: relative paths resolve against the
//! session's working directory, and refused operations return `Ok(false)`.
//! It stands in for a live server in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use syncro_core::domain::{SyncError, SyncResult};
use syncro_core::ports::{IRemoteSession, ISessionFactory};

#[derive(Debug, Default)]
struct StoreState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

/// Shared in-memory directory tree
///
/// Cloning yields another handle onto the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Creates a store containing only the root directory `/`
    pub fn new() -> Self {
        let mut state = StoreState::default();
        state.dirs.insert("/".to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates `path` and any missing parents
    pub fn create_dir(&self, path: &str) {
        let path = normalize("/", path);
        let mut state = self.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            state.dirs.insert(current.clone());
        }
    }

    /// Writes a file directly, creating parent directories
    pub fn put_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let path = normalize("/", path);
        self.create_dir(parent_of(&path));
        self.lock().files.insert(path, contents.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize("/", path)).cloned()
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.lock().files.contains_key(&normalize("/", path))
    }

    pub fn contains_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(&normalize("/", path))
    }

    /// Names of the files directly inside `dir`, sorted
    pub fn file_names(&self, dir: &str) -> Vec<String> {
        let dir = normalize("/", dir);
        self.lock()
            .files
            .keys()
            .filter(|path| parent_of(path) == dir)
            .map(|path| base_of(path).to_string())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates sessions onto a [`MemoryStore`] that accept one set of credentials
#[derive(Debug, Clone)]
pub struct MemorySessionFactory {
    store: MemoryStore,
    user: String,
    password: String,
}

impl MemorySessionFactory {
    pub fn new(store: MemoryStore, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            store,
            user: user.into(),
            password: password.into(),
        }
    }
}

impl ISessionFactory for MemorySessionFactory {
    fn create(&self) -> Box<dyn IRemoteSession> {
        Box::new(MemorySession {
            store: self.store.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            cwd: "/".to_string(),
            connected: false,
            authenticated: false,
        })
    }
}

/// One session onto a [`MemoryStore`] with its own working directory
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    user: String,
    password: String,
    cwd: String,
    connected: bool,
    authenticated: bool,
}

impl MemorySession {
    fn ensure_connected(&self) -> SyncResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(SyncError::Connectivity("session is not connected".into()))
        }
    }

    fn ensure_ready(&self) -> SyncResult<()> {
        self.ensure_connected()?;
        if self.authenticated {
            Ok(())
        } else {
            Err(SyncError::Remote("530 Not logged in".into()))
        }
    }

    fn resolve(&self, path: &str) -> String {
        normalize(&self.cwd, path)
    }
}

#[async_trait::async_trait]
impl IRemoteSession for MemorySession {
    async fn connect(&mut self, _host: &str, _port: u16) -> SyncResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn login(&mut self, user: &str, password: &str) -> SyncResult<bool> {
        self.ensure_connected()?;
        self.authenticated = user == self.user && password == self.password;
        Ok(self.authenticated)
    }

    async fn set_binary_mode(&mut self) -> SyncResult<()> {
        self.ensure_ready()
    }

    async fn set_passive_mode(&mut self) -> SyncResult<()> {
        self.ensure_ready()
    }

    async fn change_working_directory(&mut self, path: &str) -> SyncResult<bool> {
        self.ensure_ready()?;
        let target = self.resolve(path);
        if self.store.lock().dirs.contains(&target) {
            self.cwd = target;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn make_directory(&mut self, path: &str) -> SyncResult<bool> {
        self.ensure_ready()?;
        let target = self.resolve(path);
        let mut state = self.store.lock();
        if state.dirs.contains(&target)
            || state.files.contains_key(&target)
            || !state.dirs.contains(parent_of(&target))
        {
            return Ok(false);
        }
        state.dirs.insert(target);
        Ok(true)
    }

    async fn print_working_directory(&mut self) -> SyncResult<String> {
        self.ensure_ready()?;
        Ok(self.cwd.clone())
    }

    async fn store_file(
        &mut self,
        remote_name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> SyncResult<bool> {
        self.ensure_ready()?;
        let mut contents = Vec::new();
        source.read_to_end(&mut contents).await?;

        let target = self.resolve(remote_name);
        let mut state = self.store.lock();
        if !state.dirs.contains(parent_of(&target)) || state.dirs.contains(&target) {
            return Ok(false);
        }
        state.files.insert(target, contents);
        Ok(true)
    }

    async fn retrieve_file(
        &mut self,
        remote_name: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> SyncResult<bool> {
        self.ensure_ready()?;
        let target = self.resolve(remote_name);
        let contents = self.store.lock().files.get(&target).cloned();
        match contents {
            Some(bytes) => {
                sink.write_all(&bytes).await?;
                sink.flush().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_file(&mut self, remote_name: &str) -> SyncResult<bool> {
        self.ensure_ready()?;
        let target = self.resolve(remote_name);
        Ok(self.store.lock().files.remove(&target).is_some())
    }

    async fn rename(&mut self, from: &str, to: &str) -> SyncResult<bool> {
        self.ensure_ready()?;
        let from = self.resolve(from);
        let to = self.resolve(to);
        let mut state = self.store.lock();
        if !state.dirs.contains(parent_of(&to)) || state.dirs.contains(&to) {
            return Ok(false);
        }
        match state.files.remove(&from) {
            Some(bytes) => {
                state.files.insert(to, bytes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_names(&mut self, path: &str) -> SyncResult<Option<Vec<String>>> {
        self.ensure_ready()?;
        let dir = self.resolve(path);
        let state = self.store.lock();
        if !state.dirs.contains(&dir) {
            return Ok(None);
        }
        let subdirs = state
            .dirs
            .iter()
            .filter(|d| d.as_str() != "/" && parent_of(d) == dir);
        let files = state.files.keys().filter(|f| parent_of(f) == dir);
        let names = subdirs
            .chain(files)
            .map(|p| base_of(p).to_string())
            .collect();
        Ok(Some(names))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn logout(&mut self) -> SyncResult<()> {
        self.ensure_connected()?;
        self.authenticated = false;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.authenticated = false;
    }
}

/// Resolves `path` against `cwd` into an absolute path without `.`/`..`
fn normalize(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{cwd}/{path}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn base_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(store: &MemoryStore) -> Box<dyn IRemoteSession> {
        let factory = MemorySessionFactory::new(store.clone(), "u", "p");
        let mut session = factory.create();
        session.connect("memory", 21).await.unwrap();
        assert!(session.login("u", "p").await.unwrap());
        session
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/", "a.txt"), "/a.txt");
        assert_eq!(normalize("/srv", "history/a.txt"), "/srv/history/a.txt");
        assert_eq!(normalize("/srv/history", ".."), "/srv");
        assert_eq!(normalize("/srv", "/other/"), "/other");
        assert_eq!(normalize("/srv", ""), "/srv");
        assert_eq!(parent_of("/a.txt"), "/");
        assert_eq!(parent_of("/srv/a.txt"), "/srv");
    }

    #[tokio::test]
    async fn test_store_retrieve_relative_to_cursor() {
        let store = MemoryStore::new();
        store.create_dir("/srv");
        let mut s = session(&store).await;

        assert!(s.change_working_directory("srv").await.unwrap());
        let mut data: &[u8] = b"hello";
        assert!(s.store_file("a.txt", &mut data).await.unwrap());
        assert_eq!(store.file("/srv/a.txt"), Some(b"hello".to_vec()));

        let mut out = Vec::new();
        assert!(s.retrieve_file("/srv/a.txt", &mut out).await.unwrap());
        assert_eq!(out, b"hello");
        assert!(!s.retrieve_file("missing.txt", &mut out).await.unwrap());
    }

    #[tokio::test]
    async fn test_refusals_are_false_not_errors() {
        let store = MemoryStore::new();
        let mut s = session(&store).await;

        assert!(!s.delete_file("nope").await.unwrap());
        assert!(!s.rename("nope", "other").await.unwrap());
        assert!(!s.change_working_directory("nowhere").await.unwrap());
        assert!(!s.make_directory("a/b").await.unwrap());
        assert_eq!(s.list_names("nowhere").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_names_includes_dirs_and_files() {
        let store = MemoryStore::new();
        store.put_file("/a.txt", "1");
        store.create_dir("/history");
        store.put_file("/history/a.txt_2024-01-01", "0");
        let mut s = session(&store).await;

        let names = s.list_names("").await.unwrap().unwrap();
        assert_eq!(names, vec!["history".to_string(), "a.txt".to_string()]);
        let names = s.list_names("history").await.unwrap().unwrap();
        assert_eq!(names, vec!["a.txt_2024-01-01".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnected_session_errors() {
        let store = MemoryStore::new();
        let mut s = session(&store).await;
        s.disconnect().await;
        assert!(!s.is_connected());
        assert!(matches!(
            s.print_working_directory().await,
            Err(SyncError::Connectivity(_))
        ));
    }
}
