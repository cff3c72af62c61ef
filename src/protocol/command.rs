//! Command Requests and Frame Encoding
//!
//! A [`Command`] is the verb plus its arguments, each stored as `Bytes`.
//! On the wire it is always a multi-bulk of bulks:
//!
//! ```text
//! ["SET", "k", "v"]  =>  *3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n
//! ```
//!
//! Two encoders are provided:
//!
//! - [`Command::encode_into`] writes the whole frame into a growable `Vec`.
//! - [`FrameWriter`] writes the frame into fixed-size buffers, stopping when a
//!   buffer fills and resuming later in the next one. Header lines (`*N\r\n`,
//!   `$len\r\n`) and the CRLF trailer are never split; payload bytes are.

use crate::protocol::types::{prefix, CRLF};
use bytes::{BufMut, Bytes, BytesMut};

/// Longest header line: prefix + 20 digits + CRLF.
pub const MAX_HEADER_LEN: usize = 1 + 20 + 2;

/// Conversion of a value into one command argument.
///
/// Integers are written as decimal ASCII. Floats use the shortest
/// representation that parses back to the same value; infinities become
/// `+inf` / `-inf`, which Redis accepts in scores and ranges.
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &Bytes {
    fn into_arg(self) -> Bytes {
        self.clone()
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoArg for &[u8; N] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

macro_rules! int_arg {
    ($($t:ty),*) => {
        $(
            impl IntoArg for $t {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

int_arg!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoArg for f64 {
    fn into_arg(self) -> Bytes {
        if self == f64::INFINITY {
            Bytes::from_static(b"+inf")
        } else if self == f64::NEG_INFINITY {
            Bytes::from_static(b"-inf")
        } else {
            // Display for f64 is the shortest round-trip form
            Bytes::from(self.to_string())
        }
    }
}

impl IntoArg for f32 {
    fn into_arg(self) -> Bytes {
        if self == f32::INFINITY {
            Bytes::from_static(b"+inf")
        } else if self == f32::NEG_INFINITY {
            Bytes::from_static(b"-inf")
        } else {
            Bytes::from(self.to_string())
        }
    }
}

/// A command request: verb followed by its arguments.
///
/// Immutable once handed to a pipeline; cloning is cheap since arguments
/// are reference-counted `Bytes`.
///
/// # Example
/// ```
/// use flashkv_client::protocol::Command;
///
/// let cmd = Command::new("SET").arg("k").arg("v");
/// assert_eq!(cmd.encode(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Starts a command with its verb.
    pub fn new(verb: impl IntoArg) -> Self {
        Self {
            args: vec![verb.into_arg()],
        }
    }

    /// Builds a command from a full argument list (verb first).
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        Self {
            args: args.into_iter().map(IntoArg::into_arg).collect(),
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl IntoArg) -> Self {
        self.args.push(arg.into_arg());
        self
    }

    /// Appends an argument in place.
    pub fn push_arg(&mut self, arg: impl IntoArg) {
        self.args.push(arg.into_arg());
    }

    /// All arguments, verb first.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// The verb, if the command has one.
    pub fn verb(&self) -> Option<&[u8]> {
        self.args.first().map(|b| &b[..])
    }

    /// Returns true if the verb matches `name`, ignoring ASCII case.
    pub fn is(&self, name: &str) -> bool {
        self.verb()
            .map(|v| v.eq_ignore_ascii_case(name.as_bytes()))
            .unwrap_or(false)
    }

    /// Number of arguments including the verb.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns true if there are no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Exact number of bytes the encoded frame occupies.
    pub fn frame_len(&self) -> usize {
        let mut total = header_len(self.args.len());
        for arg in &self.args {
            total += header_len(arg.len()) + arg.len() + CRLF.len();
        }
        total
    }

    /// Encodes the frame into a fresh `Vec`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.frame_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the frame into an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        push_header(buf, prefix::MULTI_BULK, self.args.len());
        for arg in &self.args {
            push_header(buf, prefix::BULK, arg.len());
            buf.extend_from_slice(arg);
            buf.extend_from_slice(CRLF);
        }
    }
}

/// Outcome of one [`FrameWriter::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The whole frame has been written.
    Done,
    /// The output buffer is full; call again with a fresh buffer.
    BufferFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    FrameHeader,
    ArgHeader(usize),
    Payload { index: usize, offset: usize },
    Trailer(usize),
    Done,
}

/// Resumable writer of one command frame into bounded buffers.
///
/// Each call to [`write`](FrameWriter::write) fills `out` up to `limit`
/// total bytes and remembers exactly where it stopped.
#[derive(Debug)]
pub struct FrameWriter<'a> {
    command: &'a Command,
    step: Step,
}

impl<'a> FrameWriter<'a> {
    pub fn new(command: &'a Command) -> Self {
        Self {
            command,
            step: Step::FrameHeader,
        }
    }

    /// Returns true once the whole frame has been written.
    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    /// Returns true if some but not all of the frame has been written.
    pub fn is_partial(&self) -> bool {
        !matches!(self.step, Step::FrameHeader | Step::Done)
    }

    /// Writes as much of the frame as fits while keeping `out.len() <= limit`.
    ///
    /// `limit` must be at least [`MAX_HEADER_LEN`] larger than the length of
    /// an empty buffer, otherwise a header line could never be placed.
    pub fn write(&mut self, out: &mut BytesMut, limit: usize) -> WriteStatus {
        let args = self.command.args();

        loop {
            let space = limit.saturating_sub(out.len());
            match self.step {
                Step::FrameHeader => {
                    if !put_header(out, space, prefix::MULTI_BULK, args.len()) {
                        return WriteStatus::BufferFull;
                    }
                    self.step = if args.is_empty() {
                        Step::Done
                    } else {
                        Step::ArgHeader(0)
                    };
                }
                Step::ArgHeader(index) => {
                    if !put_header(out, space, prefix::BULK, args[index].len()) {
                        return WriteStatus::BufferFull;
                    }
                    self.step = Step::Payload { index, offset: 0 };
                }
                Step::Payload { index, offset } => {
                    let arg = &args[index];
                    let remaining = arg.len() - offset;
                    if remaining == 0 {
                        self.step = Step::Trailer(index);
                        continue;
                    }
                    if space == 0 {
                        return WriteStatus::BufferFull;
                    }
                    let take = remaining.min(space);
                    out.extend_from_slice(&arg[offset..offset + take]);
                    self.step = Step::Payload {
                        index,
                        offset: offset + take,
                    };
                }
                Step::Trailer(index) => {
                    if space < CRLF.len() {
                        return WriteStatus::BufferFull;
                    }
                    out.extend_from_slice(CRLF);
                    self.step = if index + 1 < args.len() {
                        Step::ArgHeader(index + 1)
                    } else {
                        Step::Done
                    };
                }
                Step::Done => return WriteStatus::Done,
            }
        }
    }
}

fn header_len(n: usize) -> usize {
    let mut digits = 1;
    let mut v = n / 10;
    while v > 0 {
        digits += 1;
        v /= 10;
    }
    1 + digits + CRLF.len()
}

/// Formats `n` into a stack buffer and returns the digit slice.
fn format_usize(mut n: usize, buf: &mut [u8; 20]) -> &[u8] {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[pos..]
}

fn push_header(buf: &mut Vec<u8>, kind: u8, n: usize) {
    let mut digits = [0u8; 20];
    buf.push(kind);
    buf.extend_from_slice(format_usize(n, &mut digits));
    buf.extend_from_slice(CRLF);
}

/// Writes a header line only if it fits entirely in `space`.
fn put_header(out: &mut BytesMut, space: usize, kind: u8, n: usize) -> bool {
    let mut digits = [0u8; 20];
    let digits = format_usize(n, &mut digits);
    if space < 1 + digits.len() + CRLF.len() {
        return false;
    }
    out.put_u8(kind);
    out.extend_from_slice(digits);
    out.extend_from_slice(CRLF);
    true
}
