//! Transfer handler port
//!
//! A transfer handler is the capability the workers and the file operations
//! front end call: upload, replace (archive then store), delete, list,
//! download and version scan. Two variants exist: the plain handler that
//! talks to pooled sessions, and the encrypting handler that holds a plain
//! one and rewrites the payload of uploads.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::domain::SyncResult;

/// Version history of one file: archive timestamp to remote history name
pub type VersionHistory = BTreeMap<NaiveDateTime, String>;

/// Port trait for the transfer handler chain
///
/// Every `bool` result is the remote verdict: `false` is a refused or failed
/// operation that has already been logged, not an error.
#[async_trait::async_trait]
pub trait ITransferHandler: Send + Sync {
    /// Name used in log lines (`StandardTransfer`, `EncryptedTransfer(..)`)
    fn name(&self) -> String;

    /// Stores `local` under `remote_name` in the working root
    async fn upload(&self, local: &Path, remote_name: &str) -> SyncResult<bool>;

    /// Archives the current `remote_name` into history, then stores `local`
    async fn replace(&self, local: &Path, remote_name: &str) -> SyncResult<bool>;

    async fn delete(&self, remote_name: &str) -> SyncResult<bool>;

    /// Lists names under `remote_path`; `None` when there is nothing to list
    async fn list_files(&self, remote_path: &str) -> SyncResult<Option<Vec<String>>>;

    /// Retrieves `remote_path` into `local`
    async fn download_file(&self, remote_path: &str, local: &Path) -> SyncResult<bool>;

    /// Scans the history directory for archived copies of `original_name`
    ///
    /// `None` when the history directory cannot be entered or is empty.
    async fn check_versions(&self, original_name: &str) -> SyncResult<Option<VersionHistory>>;
}

/// Gives out the current handler chain
///
/// The chain is built once and may be rebuilt on demand, so callers fetch it
/// per unit of work instead of holding on to it.
pub trait IHandlerProvider: Send + Sync {
    fn handler(&self) -> Arc<dyn ITransferHandler>;
}
