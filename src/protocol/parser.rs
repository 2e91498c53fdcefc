//! Streaming RESP Command Decoder
//!
//! Clients always send commands as an array of bulk strings:
//!
//! ```text
//! *<N>\r\n
//! $<len>\r\n<len bytes>\r\n      (repeated N times)
//! ```
//!
//! The decoder pulls bytes from any `AsyncBufRead` source. Prefix lines are
//! read by scanning for CRLF, while bulk payloads are read by exact byte
//! count so a payload may itself contain `\r\n` (binary safety).
//!
//! ## Failure modes
//!
//! - `ConnectionClosed`: the stream ended cleanly before the first byte of a
//!   command. This is a normal disconnect.
//! - `UnexpectedEof`: the stream ended in the middle of a command.
//! - Everything else means the peer sent bytes that are not a valid command.
//!
//! Lengths are always parsed and validated before any payload is read, so a
//! bogus negative length is rejected without waiting on the transport.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Errors that can occur while decoding a command.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended before a new command started
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended before the declared bytes arrived
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A prefix line carried the wrong type tag
    #[error("expected '{expected}' prefix, got {got:#04x}")]
    UnexpectedPrefix { expected: char, got: u8 },

    /// Invalid integer after a type tag
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Bulk string length is negative (and not the null sentinel)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative, or the null array
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// `$-1` appeared as a command argument
    #[error("null bulk string is not a valid command argument")]
    NullArgument,

    /// Framing violation (missing CRLF, empty prefix line, ...)
    #[error("protocol error: {0}")]
    Framing(String),

    /// The declared size exceeds the configured maximum
    #[error("message too large: {size} (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the peer simply went away rather than sending garbage.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed | ProtocolError::UnexpectedEof
        )
    }
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, ProtocolError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one command
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum length of a prefix line
const MAX_LINE_LEN: usize = 64;

/// Upper bound on what is reserved up front for a bulk payload
const INITIAL_BULK_CAPACITY: usize = 16 * 1024;

/// Decodes commands from a buffered byte stream.
///
/// The reader keeps a scratch buffer for prefix lines so a long-lived
/// connection does not allocate one per element.
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use tinykv::protocol::CommandReader;
///
/// let input: &[u8] = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
/// let mut reader = CommandReader::new(input);
/// let args = reader.read_command().await.unwrap();
/// assert_eq!(args, vec!["GET", "name"]);
/// # });
/// ```
#[derive(Debug)]
pub struct CommandReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> CommandReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads exactly one command and returns its arguments.
    pub async fn read_command(&mut self) -> ParseResult<Vec<Bytes>> {
        if self.reader.fill_buf().await?.is_empty() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let count = self.read_prefixed_int(prefix::ARRAY).await?;
        if count < 0 {
            return Err(ProtocolError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > MAX_ARRAY_LEN {
            return Err(ProtocolError::MessageTooLarge {
                size: count,
                max: MAX_ARRAY_LEN,
            });
        }

        let mut args = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            args.push(self.read_bulk_string().await?);
        }
        Ok(args)
    }

    /// Reads `$<len>\r\n<data>\r\n`.
    async fn read_bulk_string(&mut self) -> ParseResult<Bytes> {
        let length = self.read_prefixed_int(prefix::BULK_STRING).await?;

        if length == -1 {
            return Err(ProtocolError::NullArgument);
        }
        if length < 0 {
            return Err(ProtocolError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        // Grow with the bytes that actually arrive, not the declared length
        let mut data = Vec::with_capacity(length.min(INITIAL_BULK_CAPACITY));
        let read = (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut data)
            .await?;
        if read < length {
            return Err(ProtocolError::UnexpectedEof);
        }

        let mut terminator = [0u8; 2];
        self.read_exact(&mut terminator).await?;
        if &terminator[..] != CRLF {
            return Err(ProtocolError::Framing(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        Ok(Bytes::from(data))
    }

    /// Reads a prefix line and parses it as `<tag><integer>`.
    async fn read_prefixed_int(&mut self, expected: u8) -> ParseResult<i64> {
        self.read_line().await?;

        let (&tag, digits) = self
            .line
            .split_first()
            .ok_or_else(|| ProtocolError::Framing("empty prefix line".to_string()))?;

        if tag != expected {
            return Err(ProtocolError::UnexpectedPrefix {
                expected: expected as char,
                got: tag,
            });
        }

        parse_length(digits)
    }

    /// Fills `self.line` with the next line, CRLF stripped.
    ///
    /// A bare `\n` does not end a line; scanning continues to the next CRLF.
    /// At most `MAX_LINE_LEN` bytes plus the CRLF are ever buffered.
    async fn read_line(&mut self) -> ParseResult<()> {
        self.line.clear();
        loop {
            let room = (MAX_LINE_LEN + CRLF.len()).saturating_sub(self.line.len());
            if room == 0 {
                return Err(ProtocolError::Framing("prefix line too long".to_string()));
            }

            let n = (&mut self.reader)
                .take(room as u64)
                .read_until(b'\n', &mut self.line)
                .await?;
            if n == 0 {
                return Err(ProtocolError::UnexpectedEof);
            }
            if self.line.ends_with(CRLF) {
                self.line.truncate(self.line.len() - CRLF.len());
                return Ok(());
            }
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> ParseResult<()> {
        match self.reader.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::UnexpectedEof)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Parses the decimal part of a length line. Only `-` is accepted as a sign.
fn parse_length(digits: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(digits)
        .map_err(|_| ProtocolError::InvalidInteger(String::from_utf8_lossy(digits).into()))?;

    if s.starts_with('+') {
        return Err(ProtocolError::InvalidInteger(s.to_string()));
    }

    s.parse()
        .map_err(|_| ProtocolError::InvalidInteger(s.to_string()))
}

/// Reads a single command from `reader`.
///
/// Convenience wrapper for callers that do not keep a [`CommandReader`].
pub async fn decode_command<R>(reader: &mut R) -> ParseResult<Vec<Bytes>>
where
    R: AsyncBufRead + Unpin,
{
    CommandReader::new(reader).read_command().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Reply;

    async fn decode(input: &[u8]) -> ParseResult<Vec<Bytes>> {
        let mut reader = input;
        decode_command(&mut reader).await
    }

    #[tokio::test]
    async fn test_decode_get() {
        let args = decode(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").await.unwrap();
        assert_eq!(args, vec![Bytes::from("GET"), Bytes::from("name")]);
    }

    #[tokio::test]
    async fn test_decode_empty_bulk_string() {
        let args = decode(b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n").await.unwrap();
        assert_eq!(args[1], Bytes::new());
    }

    #[tokio::test]
    async fn test_decode_empty_array() {
        let args = decode(b"*0\r\n").await.unwrap();
        assert!(args.is_empty());
    }

    #[tokio::test]
    async fn test_payload_may_contain_crlf() {
        let args = decode(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$6\r\na\r\nb\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(args[2], Bytes::from_static(b"a\r\nb\r\n"));
    }

    #[tokio::test]
    async fn test_binary_safe_payload() {
        let args = decode(b"*1\r\n$5\r\nhel\x00o\r\n").await.unwrap();
        assert_eq!(args[0], Bytes::from_static(b"hel\x00o"));
    }

    #[tokio::test]
    async fn test_bulk_round_trip() {
        for s in ["", "hello", "with\r\nterminator", "日本語"] {
            let encoded = Reply::array(vec![Reply::bulk(Bytes::from(s))]).encode();
            let args = decode(&encoded).await.unwrap();
            assert_eq!(args, vec![Bytes::from(s)]);
        }
    }

    #[tokio::test]
    async fn test_reads_consecutive_commands() {
        let input: &[u8] = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let mut reader = CommandReader::new(input);

        assert_eq!(reader.read_command().await.unwrap(), vec!["PING"]);
        assert_eq!(reader.read_command().await.unwrap(), vec!["GET", "k"]);
        assert!(matches!(
            reader.read_command().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"*2\r\n$3\r\nGE")
            .read(b"T\r\n$3\r")
            .read(b"\nkey\r\n")
            .build();
        let mut reader = CommandReader::new(tokio::io::BufReader::new(mock));

        let args = reader.read_command().await.unwrap();
        assert_eq!(args, vec!["GET", "key"]);
    }

    #[tokio::test]
    async fn test_clean_close_is_distinct_from_truncation() {
        assert!(matches!(
            decode(b"").await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(matches!(
            decode(b"*2\r\n$3\r\nGET\r\n").await,
            Err(ProtocolError::UnexpectedEof)
        ));
        assert!(matches!(
            decode(b"*1\r\n$10\r\nshort").await,
            Err(ProtocolError::UnexpectedEof)
        ));
        assert!(matches!(decode(b"*1\r\n$3").await, Err(ProtocolError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_rejects_wrong_top_level_tag() {
        assert!(matches!(
            decode(b"+PING\r\n").await,
            Err(ProtocolError::UnexpectedPrefix { expected: '*', got: b'+' })
        ));
    }

    #[tokio::test]
    async fn test_rejects_wrong_element_tag() {
        assert!(matches!(
            decode(b"*1\r\n:1\r\n").await,
            Err(ProtocolError::UnexpectedPrefix { expected: '$', got: b':' })
        ));
    }

    #[tokio::test]
    async fn test_rejects_null_argument() {
        assert!(matches!(
            decode(b"*2\r\n$3\r\nGET\r\n$-1\r\n").await,
            Err(ProtocolError::NullArgument)
        ));
    }

    #[tokio::test]
    async fn test_rejects_negative_lengths_before_reading() {
        assert!(matches!(
            decode(b"*1\r\n$-5\r\n").await,
            Err(ProtocolError::InvalidBulkLength(-5))
        ));
        assert!(matches!(
            decode(b"*-1\r\n").await,
            Err(ProtocolError::InvalidArrayLength(-1))
        ));
        assert!(matches!(
            decode(b"*-3\r\n").await,
            Err(ProtocolError::InvalidArrayLength(-3))
        ));
    }

    #[tokio::test]
    async fn test_rejects_malformed_lengths() {
        assert!(matches!(
            decode(b"*x\r\n").await,
            Err(ProtocolError::InvalidInteger(_))
        ));
        assert!(matches!(
            decode(b"*+1\r\n$1\r\na\r\n").await,
            Err(ProtocolError::InvalidInteger(_))
        ));
        assert!(matches!(decode(b"\r\n").await, Err(ProtocolError::Framing(_))));
    }

    #[tokio::test]
    async fn test_rejects_missing_payload_terminator() {
        assert!(matches!(
            decode(b"*1\r\n$3\r\nabcXY").await,
            Err(ProtocolError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_oversized_bulk() {
        let input = format!("*1\r\n${}\r\n", MAX_BULK_SIZE + 1);
        assert!(matches!(
            decode(input.as_bytes()).await,
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_overlong_line_without_buffering_it() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = client.write_all(b"*").await;
            let chunk = vec![b'1'; 64 * 1024];
            for _ in 0..512 {
                if client.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let mut reader = CommandReader::new(tokio::io::BufReader::new(server));
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), reader.read_command())
            .await
            .expect("decoder kept reading an unterminated line");

        assert!(matches!(result, Err(ProtocolError::Framing(_))));
        assert!(reader.line.len() <= MAX_LINE_LEN + CRLF.len());
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let digits = format!("{:0>width$}", 1, width = MAX_LINE_LEN - 1);
        let input = format!("*{}\r\n$1\r\na\r\n", digits);
        let args = decode(input.as_bytes()).await.unwrap();
        assert_eq!(args, vec![Bytes::from("a")]);
    }

    #[tokio::test]
    async fn test_large_declared_bulk_with_short_payload() {
        let input = format!("*1\r\n${}\r\nabc", MAX_BULK_SIZE);
        assert!(matches!(
            decode(input.as_bytes()).await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }
}
