//! Transfer handler factory
//!
//! Builds the handler chain once (plain, or encrypted wrapping plain) and
//! hands out shared references to it until [`TransferHandlerFactory::reset_handler`]
//! forces a rebuild. It also owns the startup step that discovers the remote
//! layout, since both the chain and the pool depend on it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

use syncro_core::config::Config;
use syncro_core::domain::{remote_join, SyncResult};
use syncro_core::ports::{IHandlerProvider, ITransferHandler};
use syncro_remote::{ConnectionPool, PooledSession};

use crate::encrypted::EncryptedTransferHandler;
use crate::plain::StandardTransferHandler;

/// What the factory needs to know to build a chain
#[derive(Clone)]
pub struct HandlerSettings {
    /// Set only when encryption is enabled and a non-empty password exists
    pub encryption_password: Option<String>,
    pub scratch_dir: PathBuf,
    pub acquire_timeout_secs: u64,
    /// Name of the history directory below the working root
    pub history_dir: String,
}

impl HandlerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            encryption_password: if config.encryption_active() {
                config.encryption.password.clone()
            } else {
                None
            },
            scratch_dir: config.sync.scratch_dir.clone(),
            acquire_timeout_secs: config.remote.acquire_timeout_secs,
            history_dir: config.remote.history_dir.clone(),
        }
    }
}

impl std::fmt::Debug for HandlerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSettings")
            .field("encrypted", &self.encryption_password.is_some())
            .field("scratch_dir", &self.scratch_dir)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("history_dir", &self.history_dir)
            .finish()
    }
}

/// Build-once holder of the transfer handler chain
pub struct TransferHandlerFactory {
    pool: Arc<ConnectionPool>,
    settings: HandlerSettings,
    current: Mutex<Option<Arc<dyn ITransferHandler>>>,
}

impl TransferHandlerFactory {
    pub fn new(pool: Arc<ConnectionPool>, settings: HandlerSettings) -> Self {
        Self {
            pool,
            settings,
            current: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Returns the chain, building it on first use
    pub fn get_handler(&self) -> Arc<dyn ITransferHandler> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = current.as_ref() {
            return Arc::clone(handler);
        }
        let handler = self.build();
        info!(handler = %handler.name(), "Transfer handler ready");
        *current = Some(Arc::clone(&handler));
        handler
    }

    /// Drops the current chain so the next [`get_handler`](Self::get_handler) rebuilds it
    pub fn reset_handler(&self) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = previous {
            info!(handler = %handler.name(), "Transfer handler reset");
        }
    }

    fn build(&self) -> Arc<dyn ITransferHandler> {
        let plain: Arc<dyn ITransferHandler> = Arc::new(StandardTransferHandler::new(
            Arc::clone(&self.pool),
            self.settings.acquire_timeout_secs,
        ));

        let Some(password) = self.settings.encryption_password.as_deref() else {
            return plain;
        };

        match EncryptedTransferHandler::new(
            Arc::clone(&plain),
            password,
            &self.settings.scratch_dir,
        ) {
            Ok(encrypted) => Arc::new(encrypted),
            Err(e) => {
                error!(
                    error = %e,
                    scratch_dir = %self.settings.scratch_dir.display(),
                    "Cannot set up encryption, falling back to plain transfers"
                );
                plain
            }
        }
    }

    /// Discovers the working root and makes sure the history directory exists
    ///
    /// Uses one pooled session: the directory the server starts it in becomes
    /// the working root, and the history directory is entered (or created)
    /// below it. A history directory that cannot be created is only logged:
    /// archiving and version lookups then fail on their own. Both are recorded in the pool's shared layout, then the
    /// handler chain is reset so it picks them up.
    pub async fn initialize_remote(&self) -> SyncResult<()> {
        let mut session = self.pool.acquire(self.settings.acquire_timeout_secs).await?;
        let result = self.discover_layout(&mut session).await;
        self.pool.release(session).await;
        result?;
        self.reset_handler();
        Ok(())
    }

    async fn discover_layout(&self, session: &mut PooledSession) -> SyncResult<()> {
        let layout = self.pool.layout();
        let root = session.print_working_directory().await?;
        layout.set_work_dir(root.clone());

        let name = &self.settings.history_dir;
        let history = if session.change_working_directory(name).await? {
            session.print_working_directory().await?
        } else if session.make_directory(name).await? {
            info!(history_dir = %name, "Created remote history directory");
            remote_join(&root, name)
        } else {
            warn!(
                history_dir = %name,
                root = %root,
                "Cannot enter or create history directory, versioning unavailable"
            );
            remote_join(&root, name)
        };
        layout.set_history_dir(history.clone());

        info!(work_dir = %root, history_dir = %history, "Remote layout initialized");
        Ok(())
    }
}

impl IHandlerProvider for TransferHandlerFactory {
    fn handler(&self) -> Arc<dyn ITransferHandler> {
        self.get_handler()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use syncro_core::config::ConfigBuilder;
    use syncro_core::domain::RemoteLayout;
    use syncro_remote::{MemorySessionFactory, MemoryStore, PoolSettings};

    use super::*;

    fn pool(store: &MemoryStore) -> Arc<ConnectionPool> {
        let settings = PoolSettings {
            host: "memory".into(),
            port: 21,
            user: "u".into(),
            password: "p".into(),
            max_sessions: 2,
            connect_timeout: Duration::from_secs(5),
        };
        Arc::new(ConnectionPool::new(
            settings,
            Arc::new(MemorySessionFactory::new(store.clone(), "u", "p")),
            Arc::new(RemoteLayout::default()),
        ))
    }

    #[test]
    fn test_settings_from_config() {
        let plain = HandlerSettings::from_config(&ConfigBuilder::new().build());
        assert!(plain.encryption_password.is_none());
        assert_eq!(plain.history_dir, "history");

        let config = ConfigBuilder::new()
            .encryption_password("pw")
            .encryption_enabled(false)
            .build();
        assert!(HandlerSettings::from_config(&config).encryption_password.is_none());

        let config = ConfigBuilder::new().encryption_password("pw").build();
        assert_eq!(
            HandlerSettings::from_config(&config).encryption_password.as_deref(),
            Some("pw")
        );
    }

    #[test]
    fn test_chain_is_built_once_and_rebuilt_after_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let factory = TransferHandlerFactory::new(
            pool(&store),
            HandlerSettings {
                encryption_password: Some("pw".into()),
                scratch_dir: dir.path().join("scratch"),
                acquire_timeout_secs: 5,
                history_dir: "history".into(),
            },
        );

        let first = factory.get_handler();
        assert_eq!(first.name(), "EncryptedTransfer(StandardTransfer)");
        assert!(Arc::ptr_eq(&first, &factory.get_handler()));

        factory.reset_handler();
        assert!(!Arc::ptr_eq(&first, &factory.handler()));
    }

    #[test]
    fn test_unusable_scratch_dir_falls_back_to_plain() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let factory = TransferHandlerFactory::new(
            pool(&MemoryStore::new()),
            HandlerSettings {
                encryption_password: Some("pw".into()),
                scratch_dir: blocker.join("scratch"),
                acquire_timeout_secs: 5,
                history_dir: "history".into(),
            },
        );
        assert_eq!(factory.get_handler().name(), "StandardTransfer");
    }

    #[tokio::test]
    async fn test_initialize_remote_creates_history() {
        let store = MemoryStore::new();
        let pool = pool(&store);
        let factory = TransferHandlerFactory::new(
            Arc::clone(&pool),
            HandlerSettings {
                encryption_password: None,
                scratch_dir: PathBuf::from("unused"),
                acquire_timeout_secs: 5,
                history_dir: "history".into(),
            },
        );

        factory.initialize_remote().await.unwrap();
        assert!(store.contains_dir("/history"));
        assert_eq!(pool.layout().work_dir(), "/");
        assert_eq!(pool.layout().history_dir(), "/history");

        // second run enters the existing directory
        factory.initialize_remote().await.unwrap();
        assert_eq!(pool.layout().history_dir(), "/history");
        assert_eq!(pool.stats().available_permits, 2);
    }
}
