//! Configuration module for Syncro.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Syncro.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub encryption: EncryptionConfig,
    pub logging: LoggingConfig,
}

/// How staged events are keyed while they wait for a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalescePolicy {
    /// One pending file per event kind; a newer event of the same kind
    /// replaces the older one even when the files differ.
    #[default]
    ByKind,
    /// One pending entry per (kind, file) pair.
    ByFile,
}

/// Local side of the synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory watched for changes (non-recursive).
    pub root: PathBuf,
    /// Directory receiving downloaded files.
    pub downloads: PathBuf,
    /// Directory for transient encrypted artifacts.
    pub scratch_dir: PathBuf,
    /// Maximum number of concurrently running transfer units.
    pub workers: usize,
    /// Keying of the pending-work map.
    pub coalesce: CoalescePolicy,
    /// File names dropped by the watcher (exact match).
    pub ignore: Vec<String>,
}

/// Remote file store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Upper bound on concurrently checked-out sessions.
    pub max_sessions: usize,
    /// Seconds a transfer waits for a free session; 0 waits forever.
    pub acquire_timeout_secs: u64,
    /// Seconds allowed for the TCP connect of a new session.
    pub connect_timeout_secs: u64,
    /// Remote directory holding archived copies.
    pub history_dir: String,
}

/// Payload encryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    /// Passphrase for the container key derivation. `None` disables encryption
    /// even when `enabled` is set.
    pub password: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional file receiving a copy of every log line (appended).
    pub file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/syncro/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("syncro")
            .join("config.yaml")
    }

    /// True when uploads should go through the encrypting handler.
    pub fn encryption_active(&self) -> bool {
        self.encryption.enabled
            && self
                .encryption
                .password
                .as_deref()
                .is_some_and(|p| !p.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("syncro"),
            downloads: PathBuf::from("downloads"),
            scratch_dir: PathBuf::from("temp_encrypted"),
            workers: 10,
            coalesce: CoalescePolicy::ByKind,
            ignore: vec![".DS_Store".to_string()],
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 21,
            user: String::new(),
            password: String::new(),
            max_sessions: 10,
            acquire_timeout_secs: 60,
            connect_timeout_secs: 30,
            history_dir: "history".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"remote.port"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.root.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: "must not be empty".into(),
            });
        }
        if self.sync.downloads.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.downloads".into(),
                message: "must not be empty".into(),
            });
        }
        if self.sync.workers == 0 {
            errors.push(ValidationError {
                field: "sync.workers".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.ignore.iter().any(|name| name.is_empty()) {
            errors.push(ValidationError {
                field: "sync.ignore".into(),
                message: "entries must not be empty".into(),
            });
        }

        // --- remote ---
        if self.remote.server.trim().is_empty() {
            errors.push(ValidationError {
                field: "remote.server".into(),
                message: "must not be empty".into(),
            });
        }
        if self.remote.port == 0 {
            errors.push(ValidationError {
                field: "remote.port".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.remote.user.is_empty() {
            errors.push(ValidationError {
                field: "remote.user".into(),
                message: "must not be empty".into(),
            });
        }
        if self.remote.max_sessions == 0 {
            errors.push(ValidationError {
                field: "remote.max_sessions".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.remote.connect_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "remote.connect_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.remote.history_dir.is_empty() || self.remote.history_dir.contains('/') {
            errors.push(ValidationError {
                field: "remote.history_dir".into(),
                message: "must be a single non-empty directory name".into(),
            });
        }

        // --- encryption ---
        if self.encryption.enabled && !self.encryption_active() {
            errors.push(ValidationError {
                field: "encryption.password".into(),
                message: "must be set when encryption is enabled".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use syncro_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .remote_server("ftp.example.com")
///     .remote_credentials("backup", "secret")
///     .encryption_password("passphrase")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.sync.root = root.into();
        self
    }

    pub fn sync_downloads(mut self, downloads: impl Into<PathBuf>) -> Self {
        self.config.sync.downloads = downloads.into();
        self
    }

    pub fn sync_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sync.scratch_dir = dir.into();
        self
    }

    pub fn sync_workers(mut self, n: usize) -> Self {
        self.config.sync.workers = n;
        self
    }

    pub fn sync_coalesce(mut self, policy: CoalescePolicy) -> Self {
        self.config.sync.coalesce = policy;
        self
    }

    pub fn sync_ignore(mut self, names: Vec<String>) -> Self {
        self.config.sync.ignore = names;
        self
    }

    // --- remote ---

    pub fn remote_server(mut self, server: impl Into<String>) -> Self {
        self.config.remote.server = server.into();
        self
    }

    pub fn remote_port(mut self, port: u16) -> Self {
        self.config.remote.port = port;
        self
    }

    pub fn remote_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.remote.user = user.into();
        self.config.remote.password = password.into();
        self
    }

    pub fn remote_max_sessions(mut self, n: usize) -> Self {
        self.config.remote.max_sessions = n;
        self
    }

    pub fn remote_acquire_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.acquire_timeout_secs = seconds;
        self
    }

    pub fn remote_history_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.remote.history_dir = dir.into();
        self
    }

    // --- encryption ---

    /// Sets the passphrase and turns encryption on.
    pub fn encryption_password(mut self, password: impl Into<String>) -> Self {
        self.config.encryption.enabled = true;
        self.config.encryption.password = Some(password.into());
        self
    }

    pub fn encryption_enabled(mut self, enabled: bool) -> Self {
        self.config.encryption.enabled = enabled;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.config.logging.file = Some(file.into());
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
