//! Bounded pool of authenticated remote sessions
//!
//! Sessions are stateful (each one carries a working-directory cursor) and
//! expensive to establish, so they are kept in an idle queue and handed out
//! one caller at a time. A counting semaphore sized to `max_sessions` is the
//! admission gate: a caller holds one permit for as long as it holds a
//! session.
//!
//! ## Checkout protocol
//!
//! 1. [`ConnectionPool::acquire`] waits for a permit (optionally bounded),
//!    then reuses an idle session that still reports itself connected or
//!    opens a new one (connect, login, binary mode, passive mode).
//! 2. The caller works through the returned [`PooledSession`].
//! 3. [`ConnectionPool::release`] resets the cursor to the working root and
//!    requeues the session if it is still connected, otherwise drops it.
//!
//! The permit travels inside [`PooledSession`], so a guard that is dropped
//! without being released (early return, panic, cancelled task) still frees
//! its admission slot; only the session itself is lost.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use syncro_core::config::RemoteConfig;
use syncro_core::domain::{RemoteLayout, SyncError, SyncResult};
use syncro_core::ports::{IRemoteSession, ISessionFactory};

// ============================================================================
// Settings
// ============================================================================

/// Connection parameters used for every new session
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub max_sessions: usize,
    pub connect_timeout: Duration,
}

impl From<&RemoteConfig> for PoolSettings {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            host: config.server.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            max_sessions: config.max_sessions.max(1),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

/// Point-in-time view of the pool, used in log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Permits not currently held by a checkout
    pub available_permits: usize,
    /// Sessions waiting in the idle queue
    pub idle_sessions: usize,
    /// Sessions opened since the pool was created
    pub sessions_created: usize,
    pub max_sessions: usize,
}

// ============================================================================
// PooledSession
// ============================================================================

/// A checked-out session together with its admission permit
pub struct PooledSession {
    session: Box<dyn IRemoteSession>,
    permit: OwnedSemaphorePermit,
}

impl Deref for PooledSession {
    type Target = dyn IRemoteSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("connected", &self.session.is_connected())
            .finish()
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Pool of authenticated remote sessions behind a counting admission gate
pub struct ConnectionPool {
    settings: PoolSettings,
    factory: Arc<dyn ISessionFactory>,
    layout: Arc<RemoteLayout>,
    idle: Mutex<VecDeque<Box<dyn IRemoteSession>>>,
    gate: Arc<Semaphore>,
    created: AtomicUsize,
}

impl ConnectionPool {
    /// Creates an empty pool; sessions are opened lazily on first acquire
    pub fn new(
        settings: PoolSettings,
        factory: Arc<dyn ISessionFactory>,
        layout: Arc<RemoteLayout>,
    ) -> Self {
        let max_sessions = settings.max_sessions.max(1);
        info!(
            host = %settings.host,
            port = settings.port,
            max_sessions,
            "Connection pool created"
        );
        Self {
            gate: Arc::new(Semaphore::new(max_sessions)),
            settings: PoolSettings {
                max_sessions,
                ..settings
            },
            factory,
            layout,
            idle: Mutex::new(VecDeque::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// The remote layout consulted when sessions are returned
    pub fn layout(&self) -> &Arc<RemoteLayout> {
        &self.layout
    }

    /// Checks out a session, waiting at most `timeout_secs` for a permit
    ///
    /// A timeout of `0` waits indefinitely.
    ///
    /// # Errors
    ///
    /// - `SyncError::Timeout` if no permit became free in time (no side effect)
    /// - `SyncError::PoolClosed` after [`shutdown`](Self::shutdown)
    /// - `SyncError::Connectivity` / `SyncError::Authentication` if a new
    ///   session could not be established; the permit is returned
    pub async fn acquire(&self, timeout_secs: u64) -> SyncResult<PooledSession> {
        let permit = self.admit(timeout_secs).await?;

        loop {
            let candidate = self.lock_idle().pop_front();
            match candidate {
                Some(session) if session.is_connected() => {
                    debug!(
                        available = self.gate.available_permits(),
                        "Reusing idle session"
                    );
                    return Ok(PooledSession { session, permit });
                }
                Some(mut stale) => {
                    debug!("Discarding idle session that lost its connection");
                    stale.disconnect().await;
                }
                None => {
                    let session = self.open_session().await?;
                    return Ok(PooledSession { session, permit });
                }
            }
        }
    }

    /// Returns a session to the pool
    ///
    /// A connected session gets its cursor reset to the working root and is
    /// requeued; a disconnected one is dropped and a later acquire opens a
    /// replacement. The admission permit is released either way.
    pub async fn release(&self, pooled: PooledSession) {
        let PooledSession {
            mut session,
            permit,
        } = pooled;

        if self.gate.is_closed() || !session.is_connected() {
            debug!("Dropping session on release");
            session.disconnect().await;
            drop(permit);
            return;
        }

        let root = self.layout.work_dir();
        if !root.is_empty() {
            match session.change_working_directory(&root).await {
                Ok(true) => {}
                Ok(false) => warn!(root = %root, "Could not reset session to working root"),
                Err(e) => warn!(root = %root, error = %e, "Could not reset session to working root"),
            }
        }

        if session.is_connected() {
            self.lock_idle().push_back(session);
        } else {
            session.disconnect().await;
        }
        drop(permit);

        let stats = self.stats();
        debug!(
            available = stats.available_permits,
            idle = stats.idle_sessions,
            "Session released"
        );
    }

    /// Closes the admission gate and logs out every idle session
    ///
    /// Sessions currently checked out are not reclaimed; they are dropped
    /// when their holders release them.
    pub async fn shutdown(&self) {
        self.gate.close();
        let drained: Vec<_> = self.lock_idle().drain(..).collect();
        let count = drained.len();

        for mut session in drained {
            if session.is_connected() {
                if let Err(e) = session.logout().await {
                    warn!(error = %e, "Logout failed during pool shutdown");
                }
            }
            session.disconnect().await;
        }

        info!(closed = count, "Connection pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available_permits: self.gate.available_permits(),
            idle_sessions: self.lock_idle().len(),
            sessions_created: self.created.load(Ordering::Relaxed),
            max_sessions: self.settings.max_sessions,
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn admit(&self, timeout_secs: u64) -> SyncResult<OwnedSemaphorePermit> {
        let acquire = self.gate.clone().acquire_owned();
        let result = if timeout_secs == 0 {
            acquire.await
        } else {
            match tokio::time::timeout(Duration::from_secs(timeout_secs), acquire).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs, "Timed out waiting for a remote session");
                    return Err(SyncError::Timeout {
                        seconds: timeout_secs,
                    });
                }
            }
        };
        result.map_err(|_| SyncError::PoolClosed("connection pool"))
    }

    async fn open_session(&self) -> SyncResult<Box<dyn IRemoteSession>> {
        let mut session = self.factory.create();
        if let Err(e) = self.establish(session.as_mut()).await {
            session.disconnect().await;
            return Err(e);
        }

        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            host = %self.settings.host,
            sessions_created = total,
            "Opened remote session"
        );
        Ok(session)
    }

    async fn establish(&self, session: &mut dyn IRemoteSession) -> SyncResult<()> {
        let PoolSettings {
            host,
            port,
            user,
            password,
            connect_timeout,
            ..
        } = &self.settings;

        match tokio::time::timeout(*connect_timeout, session.connect(host, *port)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SyncError::Connectivity(format!(
                    "connect to {host}:{port} timed out after {}s",
                    connect_timeout.as_secs()
                )))
            }
        }

        if !session.login(user, password).await? {
            warn!(user = %user, "Remote server rejected login");
            return Err(SyncError::Authentication(format!(
                "server rejected login for user '{user}'"
            )));
        }

        session.set_binary_mode().await?;
        session.set_passive_mode().await?;
        Ok(())
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, VecDeque<Box<dyn IRemoteSession>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================
