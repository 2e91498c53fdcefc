//! Connection Handler
//!
//! Each client gets its own task running a decode, execute, reply loop
//! until the client disconnects or sends something the decoder rejects.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned, socket split into read and write halves
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  decode command (BufReader)  │
//!    │              │               │
//!    │              ▼               │
//!    │  execute (panics caught)     │
//!    │              │               │
//!    │              ▼               │
//!    │  encode reply (BufWriter)    │
//!    │              │               │
//!    │              ▼               │
//!    │  flush, loop back            │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Clean close, protocol error or I/O error ends the task
//! ```
//!
//! A command error only produces an error reply. A protocol error means the
//! byte stream can no longer be trusted, so the connection is dropped.

use crate::commands::{CommandError, CommandHandler};
use crate::protocol::{CommandReader, ProtocolError, Reply};
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Initial capacity of the reply encoding buffer
const INITIAL_REPLY_CAPACITY: usize = 256;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed, including failed ones
    pub commands_processed: AtomicU64,
    /// Commands answered with an error reply
    pub command_errors: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self, failed: bool) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.command_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    reader: CommandReader<BufReader<OwnedReadHalf>>,
    writer: BufWriter<OwnedWriteHalf>,

    /// Client's address (for logging)
    addr: SocketAddr,

    command_handler: CommandHandler,

    /// Reused between replies
    out: Vec<u8>,

    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = stream.into_split();
        Self {
            reader: CommandReader::new(BufReader::new(read_half)),
            writer: BufWriter::new(write_half),
            addr,
            command_handler,
            out: Vec::with_capacity(INITIAL_REPLY_CAPACITY),
            stats,
        }
    }

    /// Runs the connection until the client goes away or an error occurs.
    ///
    /// A clean close between commands returns `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(e) if e.is_disconnect() => {
                debug!(client = %self.addr, error = %e, "Client went away")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Closing connection"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let args = match self.reader.read_command().await {
                Ok(args) => args,
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            trace!(client = %self.addr, args = args.len(), "Decoded command");

            let reply = execute_guarded(|| self.command_handler.execute(args));
            self.stats.command_processed(reply.is_error());

            self.send_reply(&reply).await?;
        }
    }

    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        self.out.clear();
        reply.encode_into(&mut self.out);

        self.writer.write_all(&self.out).await?;
        self.writer.flush().await?;

        self.stats.bytes_written(self.out.len());
        trace!(client = %self.addr, bytes = self.out.len(), "Sent reply");
        Ok(())
    }
}

/// Runs one command, turning a command error or a panic into an error
/// reply so that neither takes the connection down.
fn execute_guarded<F>(execute: F) -> Reply
where
    F: FnOnce() -> Result<Reply, CommandError>,
{
    match panic::catch_unwind(AssertUnwindSafe(execute)) {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            trace!(error = %e, "Command failed");
            e.to_reply()
        }
        Err(_) => {
            error!("Panic while executing command");
            Reply::error("ERR internal error")
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),
}

impl ConnectionError {
    /// True if the peer simply went away rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::IoError(e) => is_reset(e),
            ConnectionError::ProtocolError(ProtocolError::Io(e)) => is_reset(e),
            ConnectionError::ProtocolError(e) => e.is_disconnect(),
        }
    }
}

fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionAborted
    )
}

/// Creates a [`ConnectionHandler`] and runs it to completion.
///
/// Errors are already logged by the handler, so they are dropped here.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    let _ = handler.run().await;
}
