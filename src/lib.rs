//! # TinyKV - A Small In-Memory Key-Value Server
//!
//! TinyKV speaks the Redis serialization protocol (RESP) and keeps byte
//! string keys and values in memory, with per-key expiry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              TinyKV                                 │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │              │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │              │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘              │
//! │                            │                  │                     │
//! │                            ▼                  ▼                     │
//! │                     ┌─────────────┐    ┌──────────────────────┐     │
//! │                     │ RESP codec  │    │    StorageEngine     │     │
//! │                     └─────────────┘    │ RwLock<HashMap<..>>  │     │
//! │                                        └──────────────────────┘     │
//! │                                                   ▲                 │
//! │                                        ┌──────────┴───────────┐     │
//! │                                        │    ExpiryManager     │     │
//! │                                        │ passive + active     │     │
//! │                                        └──────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tinykv::commands::CommandHandler;
//! use tinykv::connection::{handle_connection, ConnectionStats};
//! use tinykv::storage::{ExpiryManager, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let expiry = Arc::new(ExpiryManager::new(Arc::clone(&storage)));
//!     expiry.start()?;
//!
//!     let handler = CommandHandler::new(storage, Arc::clone(&expiry));
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, handler.clone(), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `GET key`
//! - `SET key value`
//! - `INCR key`
//! - `EXPIRE key seconds`
//! - `TTL key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP command decoder and reply encoder
//! - [`storage`]: the key-value store and expiry management
//! - [`commands`]: command validation and execution
//! - [`connection`]: client connection management
//! - [`config`]: command-line configuration for the server binary
//!
//! ## Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Passive**: a command touching a key first removes it if it is stale
//! 2. **Active**: a background task samples random keys and removes the
//!    expired ones, sampling again at once while many of them were stale

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{decode_command, ProtocolError, Reply};
pub use storage::{ExpiryConfig, ExpiryManager, StorageEngine};

/// The default port TinyKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host TinyKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TinyKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
