//! Domain error types
//!
//! One error enum covers the whole sync pipeline. Remote operations that the
//! server merely *refuses* (store, delete, rename) are not errors: they come
//! back as `Ok(false)` from the ports. The variants here are for failures the
//! caller cannot treat as a plain "no".

use thiserror::Error;

/// Errors that can occur while mirroring changes to the remote store
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote server could not be reached or the session dropped
    #[error("Connection failed: {0}")]
    Connectivity(String),

    /// The remote server rejected the configured credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No session became available before the admission timeout
    #[error("Timeout waiting for remote session after {seconds} seconds")]
    Timeout {
        /// The timeout that elapsed
        seconds: u64,
    },

    /// The remote server answered with something the client could not use
    #[error("Remote error: {0}")]
    Remote(String),

    /// A file did not carry the expected container format
    #[error("Unrecognized format: {0}")]
    Format(String),

    /// Key derivation or authenticated decryption failed
    #[error("Crypto failure: {0}")]
    Crypto(String),

    /// A local I/O error (missing file, permissions, ...)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A pool (connections or workers) no longer accepts work
    #[error("{0} is closed")]
    PoolClosed(&'static str),

    /// The configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true for the "not an encrypted container" signal
    pub fn is_format_error(&self) -> bool {
        matches!(self, SyncError::Format(_))
    }
}

/// Convenience alias used throughout the Syncro crates
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Timeout { seconds: 60 };
        assert_eq!(
            err.to_string(),
            "Timeout waiting for remote session after 60 seconds"
        );

        let err = SyncError::PoolClosed("worker pool");
        assert_eq!(err.to_string(), "worker pool is closed");

        let err = SyncError::Authentication("530 Login incorrect".to_string());
        assert_eq!(err.to_string(), "Authentication failed: 530 Login incorrect");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SyncError = io.into();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[test]
    fn test_is_format_error() {
        assert!(SyncError::Format("no magic".into()).is_format_error());
        assert!(!SyncError::Crypto("bad tag".into()).is_format_error());
    }
}
