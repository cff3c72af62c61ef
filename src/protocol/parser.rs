//! Resumable RESP Reply Decoder
//!
//! Replies arrive from the socket in chunks of arbitrary size: a read may end
//! in the middle of a length line, halfway through a bulk payload, or between
//! the `\r` and `\n` of a terminator. The decoder therefore keeps all partial
//! progress in its own state and is fed one chunk at a time.
//!
//! ## How the Decoder Works
//!
//! [`ReplyDecoder::decode`] consumes bytes from the chunk and returns:
//! - `Ok((consumed, Some(reply)))` - a complete reply ended after `consumed` bytes;
//!   the rest of the chunk belongs to the next reply
//! - `Ok((consumed, None))` - the whole chunk was absorbed, the reply is incomplete
//! - `Err(ParseError)` - invalid protocol data; the decoder is reset
//!
//! The state is an explicit enum:
//!
//! ```text
//!            line complete ($N)            N bytes copied
//!   Line ───────────────────────> BulkBody ─────────────> BulkTrailer
//!    ▲  │                                                     │
//!    │  │ line complete (+ - : $-1 *N)                      CRLF
//!    │  ▼                                                     │
//!    └── value completes the innermost open multi-bulk <──────┘
//! ```
//!
//! Open multi-bulk replies live on an explicit stack instead of the call
//! stack, so nesting never recurses.

use crate::protocol::types::{prefix, Reply, CRLF};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur during RESP decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A line carried no type prefix at all
    #[error("empty line")]
    EmptyInput,

    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a status or error line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk length is negative (but not -1 for nil)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Multi-bulk count is negative (but not -1 for nil)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Framing violation (missing CRLF, nesting too deep, etc.)
    #[error("framing error: {0}")]
    Framing(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk payload (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum multi-bulk nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Maximum length of a single header or status line (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Upper bound on pre-allocation driven by a server-supplied count.
const MAX_PREALLOC: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating a line up to `\n`.
    Line,
    /// Copying `remaining` payload bytes of a bulk.
    BulkBody { remaining: usize },
    /// Matching the CRLF after a bulk payload; `seen` bytes already matched.
    BulkTrailer { seen: usize },
}

/// An open multi-bulk waiting for `expected` elements.
#[derive(Debug)]
struct Frame {
    expected: usize,
    items: Vec<Reply>,
}

/// A resumable decoder for server replies.
///
/// # Example
///
/// ```
/// use flashkv_client::protocol::{Reply, ReplyDecoder};
///
/// let mut decoder = ReplyDecoder::new();
/// assert_eq!(decoder.decode(b"$5\r\nhel").unwrap(), (7, None));
/// let (consumed, reply) = decoder.decode(b"lo\r\n+OK\r\n").unwrap();
/// assert_eq!(consumed, 4);
/// assert_eq!(reply, Some(Reply::bulk("hello")));
/// ```
#[derive(Debug)]
pub struct ReplyDecoder {
    state: State,
    line: Vec<u8>,
    bulk: BytesMut,
    stack: Vec<Frame>,
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyDecoder {
    /// Creates a decoder positioned at the start of a reply.
    pub fn new() -> Self {
        Self {
            state: State::Line,
            line: Vec::with_capacity(64),
            bulk: BytesMut::new(),
            stack: Vec::new(),
        }
    }

    /// Returns true if part of a reply has been absorbed but not yet completed.
    pub fn in_progress(&self) -> bool {
        self.state != State::Line || !self.line.is_empty() || !self.stack.is_empty()
    }

    /// Discards any partial reply.
    pub fn reset(&mut self) {
        self.state = State::Line;
        self.line.clear();
        self.bulk = BytesMut::new();
        self.stack.clear();
    }

    /// Feeds a chunk to the decoder.
    ///
    /// Stops right after the first reply that completes, so bytes of the
    /// following reply stay in the caller's buffer.
    pub fn decode(&mut self, buf: &[u8]) -> ParseResult<(usize, Option<Reply>)> {
        match self.decode_inner(buf) {
            Ok(result) => Ok(result),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn decode_inner(&mut self, buf: &[u8]) -> ParseResult<(usize, Option<Reply>)> {
        let mut pos = 0;

        while pos < buf.len() {
            let value = match self.state {
                State::Line => {
                    let rest = &buf[pos..];
                    match rest.iter().position(|&b| b == b'\n') {
                        Some(i) => {
                            self.push_line(&rest[..=i])?;
                            pos += i + 1;
                            self.finish_line()?
                        }
                        None => {
                            self.push_line(rest)?;
                            pos = buf.len();
                            None
                        }
                    }
                }
                State::BulkBody { remaining } => {
                    let take = remaining.min(buf.len() - pos);
                    self.bulk.extend_from_slice(&buf[pos..pos + take]);
                    pos += take;
                    self.state = if take == remaining {
                        State::BulkTrailer { seen: 0 }
                    } else {
                        State::BulkBody {
                            remaining: remaining - take,
                        }
                    };
                    None
                }
                State::BulkTrailer { seen } => {
                    if buf[pos] != CRLF[seen] {
                        return Err(ParseError::Framing(
                            "bulk string missing trailing CRLF".to_string(),
                        ));
                    }
                    pos += 1;
                    if seen + 1 == CRLF.len() {
                        self.state = State::Line;
                        let data = std::mem::take(&mut self.bulk).freeze();
                        Some(Reply::Bulk(Some(data)))
                    } else {
                        self.state = State::BulkTrailer { seen: seen + 1 };
                        None
                    }
                }
            };

            if let Some(value) = value {
                if let Some(reply) = self.complete(value) {
                    return Ok((pos, Some(reply)));
                }
            }
        }

        Ok((pos, None))
    }

    fn push_line(&mut self, bytes: &[u8]) -> ParseResult<()> {
        let size = self.line.len() + bytes.len();
        if size > MAX_LINE_LENGTH {
            return Err(ParseError::MessageTooLarge {
                size,
                max: MAX_LINE_LENGTH,
            });
        }
        self.line.extend_from_slice(bytes);
        Ok(())
    }

    /// Interprets a complete line. Returns a value when the line is a whole
    /// reply by itself, `None` when it opened a bulk or multi-bulk.
    fn finish_line(&mut self) -> ParseResult<Option<Reply>> {
        let line = std::mem::take(&mut self.line);
        let len = line.len();
        if len < 2 || line[len - 2] != b'\r' {
            return Err(ParseError::Framing(
                "line not terminated by CRLF".to_string(),
            ));
        }
        let content = &line[..len - 2];
        let (&kind, body) = content.split_first().ok_or(ParseError::EmptyInput)?;

        let value = match kind {
            prefix::STATUS => Some(Reply::Status(parse_text(body)?)),
            prefix::ERROR => Some(Reply::Error(parse_text(body)?)),
            prefix::INTEGER => Some(Reply::Integer(parse_int(body)?)),
            prefix::BULK => self.open_bulk(parse_int(body)?)?,
            prefix::MULTI_BULK => self.open_multi_bulk(parse_int(body)?)?,
            other => return Err(ParseError::UnknownPrefix(other)),
        };

        // Hand the allocation back for the next line
        self.line = line;
        self.line.clear();
        Ok(value)
    }

    fn open_bulk(&mut self, length: i64) -> ParseResult<Option<Reply>> {
        if length == -1 {
            return Ok(Some(Reply::Bulk(None)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }
        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        self.bulk = BytesMut::with_capacity(length);
        self.state = if length == 0 {
            State::BulkTrailer { seen: 0 }
        } else {
            State::BulkBody { remaining: length }
        };
        Ok(None)
    }

    fn open_multi_bulk(&mut self, count: i64) -> ParseResult<Option<Reply>> {
        if count == -1 {
            return Ok(Some(Reply::MultiBulk(None)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        if count == 0 {
            return Ok(Some(Reply::MultiBulk(Some(Vec::new()))));
        }
        if self.stack.len() >= MAX_NESTING_DEPTH {
            return Err(ParseError::Framing(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        let expected = count as usize;
        self.stack.push(Frame {
            expected,
            items: Vec::with_capacity(expected.min(MAX_PREALLOC)),
        });
        Ok(None)
    }

    /// Attaches a finished value to the innermost open multi-bulk, closing
    /// every frame it fills. Returns the top-level reply once the stack empties.
    fn complete(&mut self, mut value: Reply) -> Option<Reply> {
        loop {
            match self.stack.last_mut() {
                None => return Some(value),
                Some(frame) => {
                    frame.items.push(value);
                    if frame.items.len() < frame.expected {
                        return None;
                    }
                }
            }
            let items = self.stack.pop().map(|frame| frame.items).unwrap_or_default();
            value = Reply::MultiBulk(Some(items));
        }
    }
}

fn parse_text(body: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(body)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

/// RESP integers are an optional `-` followed by digits only.
fn parse_int(body: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(body).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    if s.starts_with('+') {
        return Err(ParseError::InvalidInteger(format!("{:?}: explicit sign", s)));
    }
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(format!("{:?}: {}", s, e)))
}

/// Decodes a single reply from a buffer that is expected to hold it whole.
///
/// Returns `Ok(None)` when the buffer ends before the reply does.
pub fn decode_reply(buf: &[u8]) -> ParseResult<Option<(Reply, usize)>> {
    match ReplyDecoder::new().decode(buf)? {
        (consumed, Some(reply)) => Ok(Some((reply, consumed))),
        (_, None) => Ok(None),
    }
}

/// Wraps a payload as `Bytes` without copying when it is already owned.
pub(crate) fn bytes_of(value: &Reply) -> Option<Bytes> {
    match value {
        Reply::Bulk(Some(b)) => Some(b.clone()),
        Reply::Status(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
        _ => None,
    }
}
