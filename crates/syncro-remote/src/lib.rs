//! Syncro Remote - Sessions against the remote file store
//!
//! This crate provides:
//! - [`pool::ConnectionPool`] - bounded pool of authenticated sessions with
//!   semaphore-backed admission control
//! - [`ftp::FtpSession`] - FTP (RFC 959) implementation of the session port
//! - [`memory::MemoryStore`] - in-process store implementing the same port,
//!   used by tests and dry runs

pub mod ftp;
pub mod memory;
pub mod pool;

pub use ftp::{FtpSession, FtpSessionFactory};
pub use memory::{MemorySession, MemorySessionFactory, MemoryStore};
pub use pool::{ConnectionPool, PoolSettings, PoolStats, PooledSession};
