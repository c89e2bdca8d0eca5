//! Encrypting transfer handler
//!
//! Wraps another handler. Uploads and replaces are sealed into a container
//! in the scratch directory first and the wrapped handler transfers the
//! container; the scratch file is removed whatever the outcome. Everything
//! else passes straight through, including downloads: whoever fetches a file
//! is responsible for opening it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use syncro_core::domain::SyncResult;
use syncro_core::ports::{ITransferHandler, VersionHistory};

use crate::codec::encrypt_file_async;

/// Handler that encrypts payloads before delegating
pub struct EncryptedTransferHandler {
    inner: Arc<dyn ITransferHandler>,
    password: String,
    scratch_dir: PathBuf,
}

impl fmt::Debug for EncryptedTransferHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedTransferHandler")
            .field("inner", &self.inner.name())
            .field("scratch_dir", &self.scratch_dir)
            .finish_non_exhaustive()
    }
}

impl EncryptedTransferHandler {
    /// Wraps `inner`, creating `scratch_dir` if needed
    pub fn new(
        inner: Arc<dyn ITransferHandler>,
        password: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
    ) -> SyncResult<Self> {
        let scratch_dir = scratch_dir.into();
        std::fs::create_dir_all(&scratch_dir)?;
        Ok(Self {
            inner,
            password: password.into(),
            scratch_dir,
        })
    }

    fn scratch_path(&self, remote_name: &str) -> PathBuf {
        // Unique per call: two workers may seal the same name concurrently
        self.scratch_dir
            .join(format!("{remote_name}.{}.enc", Uuid::new_v4().simple()))
    }

    async fn seal_and_send(&self, local: &Path, remote_name: &str, replace: bool) -> bool {
        let scratch = self.scratch_path(remote_name);

        let outcome: SyncResult<bool> = async {
            encrypt_file_async(local.to_path_buf(), scratch.clone(), self.password.clone()).await?;
            debug!(remote_name, scratch = %scratch.display(), "Payload encrypted");
            if replace {
                self.inner.replace(&scratch, remote_name).await
            } else {
                self.inner.upload(&scratch, remote_name).await
            }
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(scratch = %scratch.display(), error = %e, "Could not remove scratch file");
            }
        }

        match outcome {
            Ok(sent) => sent,
            Err(e) => {
                error!(
                    handler = %self.name(),
                    remote_name,
                    local = %local.display(),
                    error = %e,
                    "Encrypted transfer failed"
                );
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl ITransferHandler for EncryptedTransferHandler {
    fn name(&self) -> String {
        format!("EncryptedTransfer({})", self.inner.name())
    }

    async fn upload(&self, local: &Path, remote_name: &str) -> SyncResult<bool> {
        Ok(self.seal_and_send(local, remote_name, false).await)
    }

    async fn replace(&self, local: &Path, remote_name: &str) -> SyncResult<bool> {
        Ok(self.seal_and_send(local, remote_name, true).await)
    }

    async fn delete(&self, remote_name: &str) -> SyncResult<bool> {
        self.inner.delete(remote_name).await
    }

    async fn list_files(&self, remote_path: &str) -> SyncResult<Option<Vec<String>>> {
        self.inner.list_files(remote_path).await
    }

    async fn download_file(&self, remote_path: &str, local: &Path) -> SyncResult<bool> {
        self.inner.download_file(remote_path, local).await
    }

    async fn check_versions(&self, original_name: &str) -> SyncResult<Option<VersionHistory>> {
        self.inner.check_versions(original_name).await
    }
}
