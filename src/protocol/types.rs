//! RESP Reply Types
//!
//! This module defines the values a Redis server sends back to a client.
//! RESP is a simple, binary-safe protocol that Redis uses for client-server communication.
//!
//! ## Protocol Format
//!
//! Each reply starts with a type prefix byte:
//! - `+` Status
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk
//! - `*` Multi-bulk
//!
//! All lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk: `$5\r\nhello\r\n`
//! Nil bulk: `$-1\r\n`
//! Multi-bulk: `*2\r\n$3\r\nfoo\r\n$-1\r\n`
//! Nil multi-bulk: `*-1\r\n`

use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const MULTI_BULK: u8 = b'*';
}

/// A reply decoded from the server.
///
/// Only `Bulk` and `MultiBulk` carry a nil form, and a nil multi-bulk
/// (`*-1`) is a different value from an empty one (`*0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Single-line status, e.g. `+OK`.
    Status(String),

    /// Error reported by the server, e.g. `-ERR wrong type`.
    /// This is an ordinary reply, not a failure of the connection.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe string; `None` is the nil bulk (`$-1`).
    Bulk(Option<Bytes>),

    /// Ordered, possibly nested replies; `None` is the nil multi-bulk (`*-1`).
    MultiBulk(Option<Vec<Reply>>),
}

impl Reply {
    /// Creates a status reply.
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates an error reply.
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    /// Creates a non-nil bulk reply.
    ///
    /// # Example
    /// ```
    /// use flashkv_client::protocol::Reply;
    /// let bulk = Reply::bulk("hello");
    /// assert_eq!(bulk.as_bytes(), Some(&b"hello"[..]));
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    /// The nil bulk reply.
    pub fn nil() -> Self {
        Reply::Bulk(None)
    }

    /// Creates a non-nil multi-bulk reply.
    pub fn multi(values: Vec<Reply>) -> Self {
        Reply::MultiBulk(Some(values))
    }

    /// The `+OK` status.
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Serializes the reply in the form a server would send it.
    ///
    /// Clients never send replies; this exists for mock servers and tests.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(Some(data)) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(None) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Reply::MultiBulk(Some(values)) => {
                buf.push(prefix::MULTI_BULK);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
            Reply::MultiBulk(None) => {
                buf.push(prefix::MULTI_BULK);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
        }
    }

    /// Returns true for the nil bulk and the nil multi-bulk.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::MultiBulk(None))
    }

    /// Returns true if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Turns an error reply into [`ClientError::Server`], passing everything
    /// else through.
    pub fn into_result(self) -> ClientResult<Reply> {
        match self {
            Reply::Error(msg) => Err(ClientError::Server(msg)),
            other => Ok(other),
        }
    }

    /// Attempts to extract text from a status or a UTF-8 bulk.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(s) => Some(s),
            Reply::Bulk(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Attempts to extract the bytes of a non-nil bulk.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to borrow the elements of a non-nil multi-bulk.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::MultiBulk(Some(arr)) => Some(arr),
            _ => None,
        }
    }

    /// Consumes self and returns the elements of a non-nil multi-bulk.
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::MultiBulk(Some(arr)) => Some(arr),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(Some(data)) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            Reply::Bulk(None) | Reply::MultiBulk(None) => write!(f, "(nil)"),
            Reply::MultiBulk(Some(values)) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialize() {
        assert_eq!(Reply::ok().serialize(), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = Reply::error("ERR unknown command");
        assert_eq!(value.serialize(), b"-ERR unknown command\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::Integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Reply::Integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_serialize() {
        assert_eq!(Reply::bulk("hello").serialize(), b"$5\r\nhello\r\n");
        assert_eq!(Reply::bulk("").serialize(), b"$0\r\n\r\n");
        assert_eq!(Reply::nil().serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_multi_bulk_serialize() {
        let value = Reply::multi(vec![Reply::bulk("foo"), Reply::nil()]);
        assert_eq!(value.serialize(), b"*2\r\n$3\r\nfoo\r\n$-1\r\n");
        assert_eq!(Reply::multi(vec![]).serialize(), b"*0\r\n");
        assert_eq!(Reply::MultiBulk(None).serialize(), b"*-1\r\n");
    }

    #[test]
    fn test_nil_is_distinct_from_empty() {
        assert!(Reply::nil().is_nil());
        assert!(!Reply::bulk("").is_nil());
        assert!(Reply::MultiBulk(None).is_nil());
        assert!(!Reply::multi(vec![]).is_nil());
        assert_ne!(Reply::MultiBulk(None), Reply::multi(vec![]));
    }

    #[test]
    fn test_into_result() {
        assert!(matches!(
            Reply::error("ERR no such key").into_result(),
            Err(ClientError::Server(m)) if m == "ERR no such key"
        ));
        assert_eq!(Reply::Integer(3).into_result().unwrap(), Reply::Integer(3));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Reply::status("PONG").as_str(), Some("PONG"));
        assert_eq!(Reply::bulk("v").as_str(), Some("v"));
        assert_eq!(Reply::Integer(7).as_integer(), Some(7));
        assert_eq!(Reply::nil().as_bytes(), None);
        let arr = Reply::multi(vec![Reply::Integer(1)]);
        assert_eq!(arr.as_array().map(|a| a.len()), Some(1));
        assert_eq!(Reply::MultiBulk(None).into_array(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Reply::nil().to_string(), "(nil)");
        assert_eq!(Reply::Integer(5).to_string(), "(integer) 5");
        assert_eq!(Reply::multi(vec![]).to_string(), "(empty array)");
    }
}
