//! Async Socket Adapter
//!
//! Wraps a byte stream (normally a `TcpStream`) and exposes the four
//! operations the pipeline needs: connect, scatter-send, receive into a
//! pooled buffer, and disconnect.
//!
//! The stream is split into independent halves so the sender and receiver
//! can run concurrently. Any `AsyncRead + AsyncWrite` works, which is how
//! tests drive the pipeline over `tokio::io::duplex` and mock streams.

use crate::buffer::PooledBuffer;
use crate::config::Endpoint;
use crate::error::{ClientError, ClientResult};
use bytes::BufMut;
use std::io::{self, IoSlice};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Opens a TCP connection to `endpoint`.
///
/// Nagle is disabled: pipelined commands are batched by the sender, so
/// there is nothing to gain from delaying small writes.
pub async fn connect(endpoint: &Endpoint, timeout: Option<Duration>) -> ClientResult<TcpStream> {
    let address = endpoint.address();
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, TcpStream::connect(&address)).await??,
        None => TcpStream::connect(&address).await?,
    };
    stream.set_nodelay(true)?;
    debug!(endpoint = %endpoint, "TCP connection established");
    Ok(stream)
}

/// Splits a stream into its read and write adapters.
pub fn split<S>(stream: S) -> (SocketReader, SocketWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    (
        SocketReader {
            inner: Box::new(read),
        },
        SocketWriter {
            inner: Box::new(write),
        },
    )
}

/// Receiving half of a connection.
pub struct SocketReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl SocketReader {
    /// Reads once into the unused tail of `buf`, never past its limit.
    ///
    /// Returns the number of bytes read; `0` means the peer closed the
    /// connection (or `buf` had no room). Cancel safe: bytes are only
    /// appended once they have been read.
    pub async fn receive(&mut self, buf: &mut PooledBuffer) -> io::Result<usize> {
        let room = buf.remaining();
        if room == 0 {
            return Ok(0);
        }
        let mut limited = (&mut **buf).limit(room);
        let n = self.inner.read_buf(&mut limited).await?;
        trace!(bytes = n, "Socket read");
        Ok(n)
    }
}

/// Sending half of a connection.
pub struct SocketWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl SocketWriter {
    /// Writes every buffer in order with vectored writes, looping over
    /// partial writes, then flushes. Returns the number of bytes written.
    pub async fn send_all(&mut self, bufs: &[PooledBuffer]) -> io::Result<usize> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut index = 0;
        let mut offset = 0;
        let mut written = 0;

        while written < total {
            // Skip buffers already fully written (or empty)
            while index < bufs.len() && offset >= bufs[index].len() {
                index += 1;
                offset = 0;
            }

            let slices: Vec<IoSlice<'_>> = std::iter::once(IoSlice::new(&bufs[index][offset..]))
                .chain(bufs[index + 1..].iter().map(|b| IoSlice::new(&b[..])))
                .collect();

            let n = self.inner.write_vectored(&slices).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                ));
            }
            written += n;

            let mut advance = n;
            while advance > 0 {
                let left = bufs[index].len() - offset;
                if advance < left {
                    offset += advance;
                    advance = 0;
                } else {
                    advance -= left;
                    index += 1;
                    offset = 0;
                }
            }
        }

        self.inner.flush().await?;
        trace!(bytes = written, buffers = bufs.len(), "Socket write");
        Ok(written)
    }

    /// Shuts down the write direction, signalling EOF to the server.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Maps an unexpected end of stream to a transport error.
pub(crate) fn closed_by_peer() -> ClientError {
    ClientError::Transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed by server",
    ))
}
