//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the traits the sync engine depends on; their implementations
//! live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteSession`] - One stateful session against the remote file store
//! - [`ISessionFactory`] - Produces fresh, unconnected sessions for the pool
//! - [`ITransferHandler`] - Upload/replace/delete/list/download/version scan
//! - [`IHandlerProvider`] - Hands out the current transfer handler chain
//! - [`IFileEventListener`] - Receives classified local change events

pub mod file_listener;
pub mod remote_session;
pub mod transfer_handler;

pub use file_listener::IFileEventListener;
pub use remote_session::{IRemoteSession, ISessionFactory};
pub use transfer_handler::{IHandlerProvider, ITransferHandler, VersionHistory};
