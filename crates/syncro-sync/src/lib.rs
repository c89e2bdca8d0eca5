//! Syncro Sync - Local change detection and dispatch
//!
//! ```text
//!  FileWatcher ──→ EventCoordinator (pending map) ──→ WorkerPool ──→ transfer handler
//! ```
//!
//! The watcher announces changes to its listeners, the coordinator stages
//! them and drains whatever is pending into the worker pool, and each worker
//! performs one remote operation.

pub mod coordinator;
pub mod engine;
pub mod watcher;
pub mod worker;

pub use coordinator::EventCoordinator;
pub use engine::SyncEngine;
pub use watcher::FileWatcher;
pub use worker::WorkerPool;
