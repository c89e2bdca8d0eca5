//! Remote session port (driven/secondary port)
//!
//! A session is one authenticated connection to the remote file store with
//! a single working-directory cursor. Sessions are owned by the connection
//! pool while idle and by exactly one caller while checked out, so the trait
//! takes `&mut self` everywhere state can change.
//!
//! ## Design Notes
//!
//! - Operations the server may simply refuse (store, delete, rename, cwd,
//!   mkdir) return `Ok(false)`; `Err` is reserved for transport and protocol
//!   failures.
//! - `list_names` returns `Ok(None)` when the server reports nothing to list.
//! - Byte streams are tokio `AsyncRead`/`AsyncWrite` trait objects so local
//!   files, pipes and in-memory buffers can all be transferred.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::SyncResult;

// ============================================================================
// IRemoteSession trait
// ============================================================================

/// Port trait for a single stateful remote session
#[async_trait::async_trait]
pub trait IRemoteSession: Send {
    /// Opens the control connection
    async fn connect(&mut self, host: &str, port: u16) -> SyncResult<()>;

    /// Authenticates; `Ok(false)` when the credentials are rejected
    async fn login(&mut self, user: &str, password: &str) -> SyncResult<bool>;

    /// Switches the session to binary (image) transfers
    async fn set_binary_mode(&mut self) -> SyncResult<()>;

    /// Makes the server listen for data connections (passive mode)
    async fn set_passive_mode(&mut self) -> SyncResult<()>;

    /// Moves the working-directory cursor
    async fn change_working_directory(&mut self, path: &str) -> SyncResult<bool>;

    async fn make_directory(&mut self, path: &str) -> SyncResult<bool>;

    /// Returns the absolute path of the working-directory cursor
    async fn print_working_directory(&mut self) -> SyncResult<String>;

    /// Stores the full contents of `source` under `remote_name`
    async fn store_file(
        &mut self,
        remote_name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> SyncResult<bool>;

    /// Copies the remote object `remote_name` into `sink`
    async fn retrieve_file(
        &mut self,
        remote_name: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> SyncResult<bool>;

    async fn delete_file(&mut self, remote_name: &str) -> SyncResult<bool>;

    async fn rename(&mut self, from: &str, to: &str) -> SyncResult<bool>;

    /// Lists entry names under `path` (empty string means the cursor)
    async fn list_names(&mut self, path: &str) -> SyncResult<Option<Vec<String>>>;

    /// Whether the session still believes its control connection is usable
    fn is_connected(&self) -> bool;

    async fn logout(&mut self) -> SyncResult<()>;

    /// Closes the connection; never fails
    async fn disconnect(&mut self);
}

// ============================================================================
// ISessionFactory trait
// ============================================================================

/// Creates unconnected sessions for the connection pool
pub trait ISessionFactory: Send + Sync {
    fn create(&self) -> Box<dyn IRemoteSession>;
}
