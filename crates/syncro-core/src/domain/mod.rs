//! Domain entities
//!
//! - Change events produced by the local watcher
//! - The remote layout (working root + history directory) discovered at startup
//! - Domain-specific error types

pub mod errors;
pub mod event;
pub mod layout;

pub use errors::{SyncError, SyncResult};
pub use event::{ChangeEvent, EventKind};
pub use layout::{remote_join, RemoteLayout};
