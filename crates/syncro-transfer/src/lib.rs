//! Syncro Transfer - Moving files to and from the remote store
//!
//! This crate provides:
//! - [`plain::StandardTransferHandler`] - transfers through the connection pool,
//!   archiving overwritten files into the history directory
//! - [`encrypted::EncryptedTransferHandler`] - seals payloads into CAEF
//!   containers before handing them to another handler
//! - [`factory::TransferHandlerFactory`] - builds the chain once and
//!   discovers the remote layout at startup
//! - [`codec`] - the CAEF container format (PBKDF2-SHA256 + AES-256-GCM)
//! - [`versions`] - history entry naming and parsing
//! - [`operations::FileOperations`] - download, delete, list and version
//!   lookups for front ends

pub mod codec;
pub mod encrypted;
pub mod factory;
pub mod operations;
pub mod plain;
pub mod versions;

pub use codec::CodecError;
pub use encrypted::EncryptedTransferHandler;
pub use factory::{HandlerSettings, TransferHandlerFactory};
pub use operations::FileOperations;
pub use plain::StandardTransferHandler;
pub use versions::VersionRecord;
