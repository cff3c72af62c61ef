//! Sender
//!
//! Frames commands into pooled write buffers and flushes them to the socket.
//!
//! ```text
//!   send(cmd) ──> FrameWriter ──> current buffer ──full──> queued [b0, b1, ..]
//!                                                              │
//!   flush()  ─────────────────────────────> one vectored write ┘
//!                                           buffers dropped back to the pool
//! ```
//!
//! A `Sender` is owned by one pipeline and used behind its send lock, so at
//! most one frame is ever being assembled and physical writes never overlap.

use super::PipelineStats;
use crate::buffer::{Acquire, BufferPool, PooledBuffer};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Command, FrameWriter, WriteStatus};
use crate::transport::SocketWriter;
use std::sync::Arc;
use tracing::trace;

pub struct Sender {
    writer: SocketWriter,
    pool: BufferPool,
    stats: Arc<PipelineStats>,

    /// Buffer currently being filled
    current: Option<PooledBuffer>,

    /// Full buffers waiting for the next flush, in submission order
    queued: Vec<PooledBuffer>,

    /// First failure on this socket; every later call reports it
    latched: Option<ClientError>,

    /// Set while a frame is half-assembled
    framing: bool,

    /// Set while a physical write is in progress
    writing: bool,
}

impl Sender {
    pub fn new(writer: SocketWriter, pool: BufferPool, stats: Arc<PipelineStats>) -> Self {
        Self {
            writer,
            pool,
            stats,
            current: None,
            queued: Vec::new(),
            latched: None,
            framing: false,
            writing: false,
        }
    }

    /// Appends one command frame to the outgoing buffers.
    ///
    /// Nothing reaches the socket unless the pool runs dry while buffers of
    /// this sender are queued; those are flushed first so the sender never
    /// waits on buffers it holds itself.
    pub async fn send(&mut self, command: &Command) -> ClientResult<()> {
        self.check()?;
        self.framing = true;

        let mut frame = FrameWriter::new(command);
        loop {
            let mut buf = match self.current.take() {
                Some(buf) => buf,
                None => self.next_buffer().await?,
            };
            let limit = buf.limit();
            match frame.write(&mut buf, limit) {
                WriteStatus::Done => {
                    self.current = Some(buf);
                    break;
                }
                WriteStatus::BufferFull => self.queued.push(buf),
            }
        }

        self.framing = false;
        self.stats.command_sent();
        trace!(args = command.len(), queued = self.queued.len(), "Frame queued");
        Ok(())
    }

    /// Writes every queued byte to the socket and returns the buffers to
    /// the pool. Returns the number of bytes written.
    pub async fn flush(&mut self) -> ClientResult<usize> {
        self.check()?;
        // An empty buffer goes straight back to the pool.
        if let Some(buf) = self.current.take().filter(|buf| !buf.is_empty()) {
            self.queued.push(buf);
        }
        self.write_queued().await
    }

    /// Shuts down the write direction of the socket.
    pub async fn shutdown(&mut self) -> ClientResult<()> {
        self.current = None;
        self.queued.clear();
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Returns the latched failure, if any.
    pub fn latched_error(&self) -> Option<ClientError> {
        self.latched.as_ref().map(ClientError::latch)
    }

    /// Bytes framed but not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.queued.iter().map(|b| b.len()).sum::<usize>()
            + self.current.as_ref().map_or(0, |b| b.len())
    }

    fn check(&mut self) -> ClientResult<()> {
        if self.latched.is_none() && (self.framing || self.writing) {
            // A previous call was dropped halfway; the stream may hold a
            // partial frame.
            self.latched = Some(ClientError::TransportLatched(
                "send interrupted mid-frame".to_string(),
            ));
        }
        match &self.latched {
            Some(err) => Err(err.latch()),
            None => Ok(()),
        }
    }

    async fn next_buffer(&mut self) -> ClientResult<PooledBuffer> {
        match self.pool.try_acquire() {
            Acquire::Ready(buf) => Ok(buf),
            Acquire::Waiting(waiter) => {
                if !self.queued.is_empty() {
                    trace!("Send pool exhausted, flushing queued buffers");
                    self.write_queued().await?;
                }
                Ok(waiter.await)
            }
        }
    }

    async fn write_queued(&mut self) -> ClientResult<usize> {
        if self.queued.is_empty() {
            return Ok(0);
        }

        self.writing = true;
        let result = self.writer.send_all(&self.queued).await;
        self.queued.clear();
        self.writing = false;

        match result {
            Ok(written) => {
                self.stats.flushed(written);
                Ok(written)
            }
            Err(e) => {
                let err = ClientError::Transport(e);
                self.latched = Some(err.latch());
                self.current = None;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::split;
    use std::io;
    use std::sync::atomic::Ordering;
    use tokio::io::AsyncReadExt;
    use tokio_test::io::Builder;

    fn sender_over(mock: tokio_test::io::Mock, buffer_size: usize, max: usize) -> Sender {
        let (_reader, writer) = split(mock);
        Sender::new(writer, BufferPool::new("send", buffer_size, max), Arc::default())
    }

    #[tokio::test]
    async fn test_send_then_flush() {
        let mock = Builder::new()
            .write(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n*1\r\n$4\r\nPING\r\n")
            .build();
        let mut sender = sender_over(mock, 64, 4);

        sender.send(&Command::new("GET").arg("key")).await.unwrap();
        sender.send(&Command::new("PING")).await.unwrap();
        assert_eq!(sender.pending_bytes(), 36);

        assert_eq!(sender.flush().await.unwrap(), 36);
        assert_eq!(sender.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn test_large_payload_spans_buffers() {
        let payload = vec![b'v'; 500];
        let command = Command::new("SET").arg("k").arg(payload);
        let expected = command.encode();

        let mock = Builder::new().write(&expected).build();
        let mut sender = sender_over(mock, 64, 16);

        sender.send(&command).await.unwrap();
        assert!(sender.queued.len() > 1);
        assert_eq!(sender.flush().await.unwrap(), expected.len());
    }

    #[tokio::test]
    async fn test_exhausted_pool_flushes_own_buffers() {
        // Two buffers in total: the frame needs more, so the sender must
        // write what it queued to get them back.
        let payload = vec![b'x'; 300];
        let command = Command::new("SET").arg("k").arg(payload);
        let expected = command.encode();

        let (client, mut server) = tokio::io::duplex(4096);
        let (_reader, writer) = split(client);
        let stats = Arc::new(PipelineStats::new());
        let mut sender = Sender::new(writer, BufferPool::new("send", 64, 2), Arc::clone(&stats));

        sender.send(&command).await.unwrap();
        sender.flush().await.unwrap();

        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);
        assert!(stats.flushes.load(Ordering::Relaxed) > 1);
        assert_eq!(
            stats.bytes_written.load(Ordering::Relaxed),
            expected.len() as u64
        );
    }

    #[tokio::test]
    async fn test_write_error_is_latched() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut sender = sender_over(mock, 64, 4);

        sender.send(&Command::new("PING")).await.unwrap();
        let err = sender.flush().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));

        let err = sender.send(&Command::new("PING")).await.unwrap_err();
        assert!(matches!(err, ClientError::TransportLatched(_)));
        assert!(sender.latched_error().is_some());
    }

    #[tokio::test]
    async fn test_interrupted_send_poisons_sender() {
        let mock = Builder::new().build();
        let (_reader, writer) = split(mock);
        let pool = BufferPool::new("send", 64, 1);
        let _held = pool.acquire().await;
        let mut sender = Sender::new(writer, pool, Arc::default());

        // The only buffer is held elsewhere, so the send parks and is dropped.
        let parked = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            sender.send(&Command::new("PING")),
        )
        .await;
        assert!(parked.is_err());

        let err = sender.flush().await.unwrap_err();
        assert!(matches!(err, ClientError::TransportLatched(_)));
    }
}
