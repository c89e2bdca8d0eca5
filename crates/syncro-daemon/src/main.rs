//! Syncro Daemon - Background folder mirroring service
//!
//! This binary handles:
//! - Configuration loading and validation
//! - Logging to stdout, optionally mirrored to a file
//! - Remote layout discovery (working root, history directory)
//! - Running the sync engine until SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Everything long-lived is built once here and handed to the components
//! that need it: the connection pool to the handler factory, the factory to
//! the sync engine. Shutdown is driven by a `CancellationToken`; once the
//! engine has drained its work the pool logs out of every idle session.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use syncro_core::config::{Config, LoggingConfig};
use syncro_core::domain::RemoteLayout;
use syncro_core::ports::IHandlerProvider;
use syncro_remote::{ConnectionPool, FtpSessionFactory, PoolSettings};
use syncro_sync::SyncEngine;
use syncro_transfer::{FileOperations, HandlerSettings, TransferHandlerFactory};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "syncrod", version, about = "Mirror a local folder to an FTP server")]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the remote side and runs the sync engine against it
struct DaemonService {
    config: Config,
    pool: Arc<ConnectionPool>,
    factory: Arc<TransferHandlerFactory>,
    operations: FileOperations,
}

impl DaemonService {
    fn new(config: Config) -> Self {
        let layout = Arc::new(RemoteLayout::new(config.remote.history_dir.clone()));
        let pool = Arc::new(ConnectionPool::new(
            PoolSettings::from(&config.remote),
            Arc::new(FtpSessionFactory),
            Arc::clone(&layout),
        ));
        let settings = HandlerSettings::from_config(&config);
        let factory = Arc::new(TransferHandlerFactory::new(Arc::clone(&pool), settings.clone()));
        let operations = FileOperations::new(
            Arc::clone(&factory) as Arc<dyn IHandlerProvider>,
            layout,
            config.sync.downloads.clone(),
            settings.encryption_password,
        );

        Self {
            config,
            pool,
            factory,
            operations,
        }
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            server = %self.config.remote.server,
            port = self.config.remote.port,
            max_sessions = self.config.remote.max_sessions,
            encrypted = self.config.encryption_active(),
            "Connecting to remote store"
        );

        if let Err(e) = self.factory.initialize_remote().await {
            self.pool.shutdown().await;
            return Err(e).context("Failed to initialize remote layout");
        }
        self.operations
            .init_download_folder()
            .await
            .with_context(|| {
                format!(
                    "Failed to create downloads folder {}",
                    self.operations.downloads().display()
                )
            })?;

        let engine = SyncEngine::new(
            &self.config.sync,
            Arc::clone(&self.factory) as Arc<dyn IHandlerProvider>,
        );
        let result = engine.run(shutdown).await;

        self.pool.shutdown().await;
        let stats = self.pool.stats();
        info!(sessions_created = stats.sessions_created, "Connection pool closed");
        result
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Installs the global subscriber
///
/// `RUST_LOG` wins over the configured level. A log file that cannot be
/// opened is reported and skipped.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let Some(path) = &logging.file else {
        builder.init();
        return;
    };

    match open_log_file(path) {
        Ok(file) => builder
            .with_ansi(false)
            .with_writer(std::io::stdout.and(Arc::new(file)))
            .init(),
        Err(e) => {
            builder.init();
            warn!(error = %format!("{e:#}"), "Logging to stdout only");
        }
    }
}

/// Opens the log file for appending, creating its directory first
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open log file {}", path.display()))
}

fn load_config(cli: &Cli) -> Result<(PathBuf, Config)> {
    match &cli.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Ok((path.clone(), config))
        }
        None => {
            let path = Config::default_path();
            let config = Config::load_or_default(&path);
            Ok((path, config))
        }
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config_path, config) = load_config(&cli)?;

    init_tracing(&config.logging);
    info!(config_path = %config_path.display(), "Syncro daemon starting (syncrod)");

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, "{}", problem.message);
        }
        bail!("invalid configuration: {} problem(s)", problems.len());
    }
    if cli.check_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config);
    let result = service.run(shutdown_token).await;

    match &result {
        Ok(()) => info!("Syncro daemon shut down gracefully"),
        Err(e) => error!(error = %e, "Syncro daemon exiting with error"),
    }

    result
}

#[cfg(test)]
mod tests {
    use syncro_core::config::ConfigBuilder;

    use super::*;

    #[test]
    fn test_cli_parses_config_flag() {
        let cli = Cli::try_parse_from(["syncrod", "--config", "/etc/syncro.yaml", "--check-config"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/syncro.yaml")));
        assert!(cli.check_config);

        let cli = Cli::try_parse_from(["syncrod"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.check_config);
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config: Some(dir.path().join("missing.yaml")),
            check_config: false,
        };
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_explicit_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "remote:\n  server: ftp.example.com\n  user: alice\n").unwrap();

        let cli = Cli {
            config: Some(path.clone()),
            check_config: true,
        };
        let (loaded_from, config) = load_config(&cli).unwrap();
        assert_eq!(loaded_from, path);
        assert_eq!(config.remote.server, "ftp.example.com");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_log_file_reports_failing_step() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("syncro.log");
        open_log_file(&nested).unwrap();
        assert!(nested.exists());

        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let err = open_log_file(&blocker.join("syncro.log")).unwrap_err();
        assert!(err.to_string().starts_with("Cannot create log directory"));
    }

    #[test]
    fn test_service_wires_encrypted_chain() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigBuilder::new()
            .remote_server("ftp.example.com")
            .remote_credentials("alice", "pw")
            .sync_scratch_dir(dir.path().join("scratch"))
            .sync_downloads(dir.path().join("downloads"))
            .encryption_password("secret")
            .build();

        let service = DaemonService::new(config);
        assert_eq!(
            service.factory.get_handler().name(),
            "EncryptedTransfer(StandardTransfer)"
        );
        assert_eq!(service.operations.downloads(), dir.path().join("downloads"));
        assert_eq!(service.pool.stats().sessions_created, 0);
    }
}
