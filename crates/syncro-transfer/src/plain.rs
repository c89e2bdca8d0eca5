//! Plain transfer handler
//!
//! Every operation checks out one pooled session, moves its cursor to the
//! working root, does its work and hands the session back. The release
//! happens on every path out of the operation, including errors.

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use syncro_core::domain::{SyncError, SyncResult};
use syncro_core::ports::{ITransferHandler, VersionHistory};
use syncro_remote::{ConnectionPool, PooledSession};

use crate::versions::{collect_versions, history_name_now};

/// Name reported by [`StandardTransferHandler`]
pub const STANDARD_HANDLER_NAME: &str = "StandardTransfer";

/// Transfers files unchanged through the connection pool
pub struct StandardTransferHandler {
    pool: Arc<ConnectionPool>,
    acquire_timeout_secs: u64,
}

impl StandardTransferHandler {
    /// `acquire_timeout_secs` bounds the wait for a free session (0 waits forever)
    pub fn new(pool: Arc<ConnectionPool>, acquire_timeout_secs: u64) -> Self {
        Self {
            pool,
            acquire_timeout_secs,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Acquires a session positioned at the working root
    async fn checkout(&self) -> SyncResult<PooledSession> {
        let mut session = self.pool.acquire(self.acquire_timeout_secs).await?;
        let root = self.pool.layout().work_dir();
        if !root.is_empty() {
            match session.change_working_directory(&root).await {
                Ok(true) => {}
                Ok(false) => warn!(root = %root, "Could not enter working root"),
                Err(e) => {
                    self.pool.release(session).await;
                    return Err(e);
                }
            }
        }
        Ok(session)
    }

    async fn store(
        session: &mut PooledSession,
        file: &mut tokio::fs::File,
        remote_name: &str,
    ) -> SyncResult<bool> {
        let stored = session.store_file(remote_name, file).await?;
        if stored {
            info!(remote_name, "File uploaded");
        } else {
            warn!(remote_name, "Remote refused upload");
        }
        Ok(stored)
    }

    async fn archive_and_store(
        &self,
        session: &mut PooledSession,
        file: &mut tokio::fs::File,
        remote_name: &str,
    ) -> SyncResult<bool> {
        let archived = self
            .pool
            .layout()
            .history_path(&history_name_now(remote_name));
        if session.rename(remote_name, &archived).await? {
            info!(remote_name, archived = %archived, "Previous version archived");
        } else {
            warn!(
                remote_name,
                archived = %archived,
                "Could not archive previous version, storing anyway"
            );
        }
        Self::store(session, file, remote_name).await
    }

    async fn fetch(session: &mut PooledSession, remote_path: &str, local: &Path) -> SyncResult<bool> {
        let mut file = tokio::fs::File::create(local).await?;
        let fetched = match session.retrieve_file(remote_path, &mut file).await {
            Ok(true) => file.flush().await.map(|_| true).map_err(SyncError::from),
            other => other,
        };
        drop(file);
        match fetched {
            Ok(true) => {
                info!(remote_path, local = %local.display(), "File downloaded");
                Ok(true)
            }
            other => {
                let _ = tokio::fs::remove_file(local).await;
                if let Ok(false) = other {
                    warn!(remote_path, "Remote refused download");
                }
                other
            }
        }
    }

    async fn scan_history(
        &self,
        session: &mut PooledSession,
        original_name: &str,
    ) -> SyncResult<Option<VersionHistory>> {
        let history_dir = self.pool.layout().history_dir();
        if !session.change_working_directory(&history_dir).await? {
            warn!(history_dir = %history_dir, "Cannot enter history directory");
            return Ok(None);
        }
        match session.list_names("").await? {
            Some(names) if !names.is_empty() => {
                let history = collect_versions(original_name, &names);
                debug!(original_name, versions = history.len(), "History scanned");
                Ok(Some(history))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl ITransferHandler for StandardTransferHandler {
    fn name(&self) -> String {
        STANDARD_HANDLER_NAME.to_string()
    }

    async fn upload(&self, local: &Path, remote_name: &str) -> SyncResult<bool> {
        let mut file = tokio::fs::File::open(local).await?;
        let mut session = self.checkout().await?;
        let result = Self::store(&mut session, &mut file, remote_name).await;
        self.pool.release(session).await;
        result
    }

    async fn replace(&self, local: &Path, remote_name: &str) -> SyncResult<bool> {
        let mut file = tokio::fs::File::open(local).await?;
        let mut session = self.checkout().await?;
        let result = self.archive_and_store(&mut session, &mut file, remote_name).await;
        self.pool.release(session).await;
        result
    }

    async fn delete(&self, remote_name: &str) -> SyncResult<bool> {
        let mut session = self.checkout().await?;
        let result = session.delete_file(remote_name).await;
        self.pool.release(session).await;

        match result {
            Ok(true) => info!(remote_name, "Remote file deleted"),
            Ok(false) => warn!(remote_name, "Remote refused delete"),
            Err(_) => {}
        }
        result
    }

    async fn list_files(&self, remote_path: &str) -> SyncResult<Option<Vec<String>>> {
        let mut session = self.checkout().await?;
        let result = session.list_names(remote_path).await;
        self.pool.release(session).await;

        Ok(result?.filter(|names| !names.is_empty()))
    }

    async fn download_file(&self, remote_path: &str, local: &Path) -> SyncResult<bool> {
        let mut session = self.checkout().await?;
        let result = Self::fetch(&mut session, remote_path, local).await;
        self.pool.release(session).await;
        result
    }

    async fn check_versions(&self, original_name: &str) -> SyncResult<Option<VersionHistory>> {
        let mut session = self.checkout().await?;
        let result = self.scan_history(&mut session, original_name).await;
        self.pool.release(session).await;
        result
    }
}
