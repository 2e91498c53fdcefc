//! Command Module
//!
//! Receives decoded argument lists, executes them against the storage
//! engine, and produces the reply for each.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Decoder   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Resolve      │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! Supported: `PING`, `GET`, `SET`, `INCR`, `EXPIRE`, `TTL`.

pub mod handler;

pub use handler::{Command, CommandError, CommandHandler};
