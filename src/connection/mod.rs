//! Connection Module
//!
//! One async task per client connection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept(), spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Decode RESP │───>│ Execute cmd │───>│ Send reply  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pipelined commands are answered in order, since each one is decoded
//! straight off the buffered read half.
//!
//! ## Example
//!
//! ```ignore
//! use tinykv::commands::CommandHandler;
//! use tinykv::connection::{handle_connection, ConnectionStats};
//! use tinykv::storage::{ExpiryManager, StorageEngine};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let expiry = Arc::new(ExpiryManager::new(Arc::clone(&storage)));
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(storage, expiry);
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), stats));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
