//! RESP Protocol Codec
//!
//! A pure, bidirectional transform between wire bytes and the values the
//! rest of the server works with.
//!
//! ## Modules
//!
//! - `types`: the `Reply` enum and its encoding
//! - `parser`: streaming decoder for incoming commands
//!
//! ## Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use tinykv::protocol::{decode_command, Reply};
//! use bytes::Bytes;
//!
//! // Decoding a command from any buffered byte stream
//! let mut input: &[u8] = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let args = decode_command(&mut input).await.unwrap();
//! assert_eq!(args.len(), 2);
//!
//! // Encoding a reply
//! let bytes = Reply::bulk(Bytes::from("Ariz")).encode();
//! assert_eq!(bytes, b"$4\r\nAriz\r\n");
//! # });
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode_command, CommandReader, ParseResult, ProtocolError};
pub use types::Reply;
