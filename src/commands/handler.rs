//! Command Handler
//!
//! Turns a decoded argument list into a [`Command`], validates it, and runs
//! it against the storage engine.
//!
//! ## Supported Commands
//!
//! - `PING [message]` - Test connection
//! - `GET key` - Get a key's value
//! - `SET key value` - Set a key, clearing any expiry
//! - `INCR key` - Increment an integer value
//! - `EXPIRE key seconds` - Set a key's time to live
//! - `TTL key` - Get a key's remaining time to live
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────┐     │
//! │  │  parse()    │───>│ passive      │───>│  apply()    │     │
//! │  │  name/arity │    │ expiry check │    │             │     │
//! │  └─────────────┘    └──────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every command that reads or modifies an existing key (GET, INCR, EXPIRE,
//! TTL) runs the passive expiry check before touching the value. SET skips
//! it because it replaces the whole entry anyway.

use crate::protocol::Reply;
use crate::storage::{unix_now, ExpiryManager, IncrError, KeyTtl, StorageEngine};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// A per-command failure. The connection stays open and the error text is
/// sent back as an error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),
}

impl From<IncrError> for CommandError {
    fn from(e: IncrError) -> Self {
        match e {
            IncrError::NotAnInteger => CommandError::NotAnInteger,
            IncrError::Overflow => CommandError::Overflow,
        }
    }
}

impl CommandError {
    /// Converts the error into the reply sent to the client.
    pub fn to_reply(&self) -> Reply {
        Reply::error(self.to_string())
    }
}

/// A validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping(Option<Bytes>),
    Get(Bytes),
    Set { key: Bytes, value: Bytes },
    Incr(Bytes),
    Expire { key: Bytes, seconds: u64 },
    Ttl(Bytes),
}

impl Command {
    /// Resolves the command name (case-insensitive) and checks arity and
    /// argument types.
    pub fn parse(args: Vec<Bytes>) -> Result<Self, CommandError> {
        let mut args = args.into_iter();
        let name = args.next().ok_or(CommandError::EmptyCommand)?;
        let args: Vec<Bytes> = args.collect();

        match name.to_ascii_uppercase().as_slice() {
            b"PING" => match args.len() {
                0 | 1 => Ok(Command::Ping(args.into_iter().next())),
                _ => Err(CommandError::WrongArity("ping")),
            },
            b"GET" => {
                let [key] = exact(args, "get")?;
                Ok(Command::Get(key))
            }
            b"SET" => {
                let [key, value] = exact(args, "set")?;
                Ok(Command::Set { key, value })
            }
            b"INCR" => {
                let [key] = exact(args, "incr")?;
                Ok(Command::Incr(key))
            }
            b"EXPIRE" => {
                let [key, seconds] = exact(args, "expire")?;
                let seconds = parse_i64(&seconds)?;
                let seconds =
                    u64::try_from(seconds).map_err(|_| CommandError::InvalidExpireTime("expire"))?;
                Ok(Command::Expire { key, seconds })
            }
            b"TTL" => {
                let [key] = exact(args, "ttl")?;
                Ok(Command::Ttl(key))
            }
            _ => Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(&name).into_owned(),
            )),
        }
    }

    /// Lowercase command name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "ping",
            Command::Get(_) => "get",
            Command::Set { .. } => "set",
            Command::Incr(_) => "incr",
            Command::Expire { .. } => "expire",
            Command::Ttl(_) => "ttl",
        }
    }
}

fn exact<const N: usize>(args: Vec<Bytes>, name: &'static str) -> Result<[Bytes; N], CommandError> {
    <[Bytes; N]>::try_from(args).map_err(|_| CommandError::WrongArity(name))
}

fn parse_i64(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

/// Executes commands against a shared store.
///
/// Stateless between calls; clone it freely, one per connection.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    expiry: Arc<ExpiryManager>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, expiry: Arc<ExpiryManager>) -> Self {
        Self { storage, expiry }
    }

    /// Parses and executes one command.
    pub fn execute(&self, args: Vec<Bytes>) -> Result<Reply, CommandError> {
        let command = Command::parse(args)?;
        trace!(command = command.name(), "Executing command");
        self.apply(command)
    }

    /// Executes an already validated command.
    pub fn apply(&self, command: Command) -> Result<Reply, CommandError> {
        match command {
            Command::Ping(None) => Ok(Reply::pong()),
            Command::Ping(Some(message)) => Ok(Reply::bulk(message)),
            Command::Get(key) => Ok(self.get(&key)),
            Command::Set { key, value } => {
                self.storage.set(key, value);
                Ok(Reply::ok())
            }
            Command::Incr(key) => self.incr(&key),
            Command::Expire { key, seconds } => Ok(self.expire(&key, seconds)),
            Command::Ttl(key) => Ok(self.ttl(&key)),
        }
    }

    fn get(&self, key: &[u8]) -> Reply {
        self.expiry.check_and_remove_if_expired(key);
        match self.storage.get_live(key, unix_now()) {
            Some(value) => Reply::bulk(value),
            None => Reply::null(),
        }
    }

    fn incr(&self, key: &[u8]) -> Result<Reply, CommandError> {
        self.expiry.check_and_remove_if_expired(key);
        let value = self.storage.incr_by(key, 1)?;
        Ok(Reply::integer(value))
    }

    /// Replies 1 if the expiry was set, 0 if the key does not exist.
    fn expire(&self, key: &[u8], seconds: u64) -> Reply {
        self.expiry.check_and_remove_if_expired(key);
        Reply::integer(self.expiry.set_expiry_in(key, seconds) as i64)
    }

    /// Replies -2 for a missing key, -1 for a key without expiry, otherwise
    /// the remaining whole seconds.
    fn ttl(&self, key: &[u8]) -> Reply {
        self.expiry.check_and_remove_if_expired(key);
        let ttl = match self.expiry.remaining_ttl(key) {
            KeyTtl::Missing => -2,
            KeyTtl::NoExpiry => -1,
            KeyTtl::Remaining(secs) => i64::try_from(secs).unwrap_or(i64::MAX),
        };
        Reply::integer(ttl)
    }
}
