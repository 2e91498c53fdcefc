//! Storage Module
//!
//! The key space and the machinery that expires it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               StorageEngine                 │
//! │   RwLock<HashMap<key, (value, expires_at)>> │
//! └─────────────────────────────────────────────┘
//!          ▲                        ▲
//!          │ passive check          │ sampled checks
//!          │ (per command)          │ (background task)
//!  ┌───────┴────────┐      ┌────────┴──────────┐
//!  │ CommandHandler │      │   ExpiryManager   │
//!  └────────────────┘      └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tinykv::storage::{ExpiryManager, StorageEngine};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(StorageEngine::new());
//! let expiry = ExpiryManager::new(Arc::clone(&engine));
//!
//! engine.set(Bytes::from("session"), Bytes::from("token123"));
//! expiry.set_expiry_in(b"session", 0);
//!
//! assert!(expiry.check_and_remove_if_expired(b"session"));
//! assert_eq!(engine.get(b"session"), None);
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, IncrError, StorageEngine, StorageStats};
pub use expiry::{unix_now, ExpiryConfig, ExpiryError, ExpiryManager, KeyTtl};
