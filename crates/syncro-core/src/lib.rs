//! Syncro Core - Domain types and port definitions
//!
//! This crate contains the pieces every other Syncro crate agrees on:
//! - **Configuration** - the YAML configuration file and its validation
//! - **Domain types** - change events, the shared remote layout, error taxonomy
//! - **Port definitions** - traits for the remote session, the transfer
//!   handler chain and file event listeners
//!
//! # Architecture
//!
//! Adapters (the FTP session, the connection pool, the transfer handlers,
//! the watcher) live in their own crates and only meet through the traits
//! in [`ports`].

pub mod config;
pub mod domain;
pub mod ports;
