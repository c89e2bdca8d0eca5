//! File operations used by front ends
//!
//! Downloads land in a temporary file inside the downloads folder first. If
//! encryption is configured the temporary file is opened into its final
//! name; a file that never was a container is moved into place as is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use syncro_core::domain::{RemoteLayout, SyncError, SyncResult};
use syncro_core::ports::{IHandlerProvider, VersionHistory};

use crate::codec::{decrypt_file_async, CodecError};

/// Prefix of the temporary file a download is written to
pub const TEMP_PREFIX: &str = "temp_";

pub struct FileOperations {
    handlers: Arc<dyn IHandlerProvider>,
    layout: Arc<RemoteLayout>,
    downloads: PathBuf,
    encryption_password: Option<String>,
}

impl FileOperations {
    pub fn new(
        handlers: Arc<dyn IHandlerProvider>,
        layout: Arc<RemoteLayout>,
        downloads: impl Into<PathBuf>,
        encryption_password: Option<String>,
    ) -> Self {
        Self {
            handlers,
            layout,
            downloads: downloads.into(),
            encryption_password: encryption_password.filter(|p| !p.is_empty()),
        }
    }

    pub fn downloads(&self) -> &Path {
        &self.downloads
    }

    /// Creates the downloads folder if it does not exist yet
    pub async fn init_download_folder(&self) -> SyncResult<()> {
        tokio::fs::create_dir_all(&self.downloads).await?;
        Ok(())
    }

    /// Fetches `remote_path` into the downloads folder
    ///
    /// Returns the local path of the result, or `None` when the remote
    /// refused the transfer.
    pub async fn download_file(&self, remote_path: &str) -> SyncResult<Option<PathBuf>> {
        let name = base_name(remote_path)
            .ok_or_else(|| SyncError::Remote(format!("no file name in '{remote_path}'")))?;
        self.init_download_folder().await?;

        let temp = self.downloads.join(format!("{TEMP_PREFIX}{name}"));
        let target = self.downloads.join(name);

        let handler = self.handlers.handler();
        if !handler.download_file(remote_path, &temp).await? {
            warn!(remote_path, handler = %handler.name(), "Download refused");
            return Ok(None);
        }

        let Some(password) = self.encryption_password.clone() else {
            tokio::fs::rename(&temp, &target).await?;
            info!(remote_path, local = %target.display(), "Download complete");
            return Ok(Some(target));
        };

        match decrypt_file_async(temp.clone(), target.clone(), password).await {
            Ok(bytes) => {
                tokio::fs::remove_file(&temp).await?;
                info!(remote_path, local = %target.display(), bytes, "Download decrypted");
                Ok(Some(target))
            }
            Err(CodecError::UnrecognizedFormat) => {
                tokio::fs::rename(&temp, &target).await?;
                info!(
                    remote_path,
                    local = %target.display(),
                    "Download is not encrypted, kept as plaintext"
                );
                Ok(Some(target))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                Err(e.into())
            }
        }
    }

    pub async fn delete_remote_file(&self, remote_name: &str) -> SyncResult<bool> {
        self.handlers.handler().delete(remote_name).await
    }

    /// Names under `remote_path`, or `None` when there are none
    pub async fn list_remote_files(&self, remote_path: &str) -> SyncResult<Option<Vec<String>>> {
        self.handlers.handler().list_files(remote_path).await
    }

    pub async fn check_versions(&self, original_name: &str) -> SyncResult<Option<VersionHistory>> {
        self.handlers.handler().check_versions(original_name).await
    }

    /// Remote path of a history entry, suitable for [`download_file`](Self::download_file)
    pub fn history_path(&self, entry: &str) -> String {
        self.layout.history_path(entry)
    }
}

fn base_name(remote_path: &str) -> Option<&str> {
    remote_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}
