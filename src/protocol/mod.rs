//! RESP Protocol Implementation
//!
//! This module is the client side of the Redis Serialization Protocol (RESP).
//! It performs no I/O: it turns commands into bytes and bytes into replies.
//!
//! ## Modules
//!
//! - `types`: Defines the `Reply` enum
//! - `command`: `Command` requests and the resumable `FrameWriter`
//! - `parser`: The resumable `ReplyDecoder`
//!
//! ## Example
//!
//! ```
//! use flashkv_client::protocol::{decode_reply, Command, Reply};
//!
//! // Framing a request
//! let bytes = Command::new("GET").arg("name").encode();
//! assert_eq!(bytes, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
//!
//! // Decoding a reply
//! let (reply, consumed) = decode_reply(b"+OK\r\n").unwrap().unwrap();
//! assert_eq!(reply, Reply::status("OK"));
//! assert_eq!(consumed, 5);
//! ```

pub mod command;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use command::{Command, FrameWriter, IntoArg, WriteStatus, MAX_HEADER_LEN};
pub use parser::{decode_reply, ParseError, ParseResult, ReplyDecoder};
pub use types::Reply;
