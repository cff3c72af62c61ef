//! Receiver
//!
//! Reads socket bytes into pooled buffers and drives the [`ReplyDecoder`]
//! until a whole reply is available. All progress (current buffer, cursor
//! and partial decode) lives in the struct, so a `read_reply` future can be
//! dropped at any await point and the next call picks up where it stopped.

use super::PipelineStats;
use crate::buffer::{BufferPool, PooledBuffer};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Reply, ReplyDecoder};
use crate::transport::socket::closed_by_peer;
use crate::transport::SocketReader;
use std::sync::Arc;
use tracing::trace;

pub struct Receiver {
    reader: SocketReader,
    pool: BufferPool,
    current: Option<PooledBuffer>,
    cursor: usize,
    decoder: ReplyDecoder,
    latched: Option<ClientError>,
    stats: Arc<PipelineStats>,
}

impl Receiver {
    pub fn new(reader: SocketReader, pool: BufferPool, stats: Arc<PipelineStats>) -> Self {
        Self {
            reader,
            pool,
            current: None,
            cursor: 0,
            decoder: ReplyDecoder::new(),
            latched: None,
            stats,
        }
    }

    /// Returns the next complete reply from the socket.
    pub async fn read_reply(&mut self) -> ClientResult<Reply> {
        if let Some(err) = &self.latched {
            return Err(err.latch());
        }

        loop {
            let decoded = match &self.current {
                Some(buf) if self.cursor < buf.len() => {
                    Some(self.decoder.decode(&buf[self.cursor..]))
                }
                _ => None,
            };

            match decoded {
                Some(Ok((consumed, reply))) => {
                    self.cursor += consumed;
                    if let Some(reply) = reply {
                        self.release_drained();
                        return Ok(reply);
                    }
                }
                Some(Err(e)) => return Err(self.fail(ClientError::Protocol(e))),
                None => self.fill().await?,
            }
        }
    }

    /// Returns true if bytes of a reply have been read but not yet returned.
    pub fn has_partial(&self) -> bool {
        self.decoder.in_progress()
            || self
                .current
                .as_ref()
                .is_some_and(|buf| self.cursor < buf.len())
    }

    /// Gives a fully consumed buffer back to the pool so an idle
    /// connection holds no receive buffer.
    fn release_drained(&mut self) {
        if self
            .current
            .as_ref()
            .is_some_and(|buf| self.cursor >= buf.len())
        {
            self.current = None;
            self.cursor = 0;
        }
    }

    /// Swaps the drained buffer for a fresh one and reads into it.
    async fn fill(&mut self) -> ClientResult<()> {
        self.current = None;
        self.cursor = 0;

        let buf = self.current.insert(self.pool.acquire().await);
        match self.reader.receive(buf).await {
            Ok(0) => Err(self.fail(closed_by_peer())),
            Ok(n) => {
                self.stats.bytes_read(n);
                trace!(bytes = n, "Receive buffer filled");
                Ok(())
            }
            Err(e) => Err(self.fail(ClientError::Transport(e))),
        }
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        self.decoder.reset();
        self.current = None;
        self.cursor = 0;
        self.latched = Some(err.latch());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParseError;
    use crate::transport::split;
    use std::io;
    use std::sync::atomic::Ordering;
    use tokio_test::io::Builder;

    fn receiver_over(mock: tokio_test::io::Mock, buffer_size: usize) -> Receiver {
        let (reader, _writer) = split(mock);
        Receiver::new(reader, BufferPool::new("recv", buffer_size, 2), Arc::default())
    }

    #[tokio::test]
    async fn test_replies_sharing_one_read() {
        let mock = Builder::new().read(b"+OK\r\n:42\r\n$-1\r\n").build();
        let mut receiver = receiver_over(mock, 64);

        assert_eq!(receiver.read_reply().await.unwrap(), Reply::ok());
        assert!(receiver.has_partial());
        assert_eq!(receiver.read_reply().await.unwrap(), Reply::Integer(42));
        assert_eq!(receiver.read_reply().await.unwrap(), Reply::nil());
        assert!(!receiver.has_partial());
        assert_eq!(receiver.stats.bytes_read.load(Ordering::Relaxed), 15);
    }

    #[tokio::test]
    async fn test_drained_buffer_returns_to_pool() {
        let mock = Builder::new().read(b"+OK\r\n:1\r\n").read(b"+PONG\r\n").build();
        let mut receiver = receiver_over(mock, 64);
        let pool = receiver.pool.clone();

        assert_eq!(receiver.read_reply().await.unwrap(), Reply::ok());
        assert_eq!(pool.stats().outstanding, 1);
        assert_eq!(receiver.read_reply().await.unwrap(), Reply::Integer(1));
        assert_eq!(pool.stats().outstanding, 0);

        assert_eq!(receiver.read_reply().await.unwrap(), Reply::status("PONG"));
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().free, 1);
    }

    #[tokio::test]
    async fn test_one_byte_reads() {
        let wire = b"*2\r\n$5\r\nhello\r\n:-7\r\n";
        let mut builder = Builder::new();
        for byte in wire.iter() {
            builder.read(std::slice::from_ref(byte));
        }
        let mut receiver = receiver_over(builder.build(), 64);

        let reply = receiver.read_reply().await.unwrap();
        assert_eq!(
            reply,
            Reply::multi(vec![Reply::bulk("hello"), Reply::Integer(-7)])
        );
    }

    #[tokio::test]
    async fn test_reply_larger_than_buffer() {
        let payload = vec![b'z'; 1000];
        let wire = Reply::bulk(payload.clone()).serialize();
        let mock = Builder::new().read(&wire).build();
        let mut receiver = receiver_over(mock, 64);

        assert_eq!(receiver.read_reply().await.unwrap(), Reply::bulk(payload));
    }

    #[tokio::test]
    async fn test_eof_is_latched_transport_error() {
        let mock = Builder::new().read(b"$5\r\nhel").build();
        let mut receiver = receiver_over(mock, 64);

        let err = receiver.read_reply().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));

        let err = receiver.read_reply().await.unwrap_err();
        assert!(matches!(err, ClientError::TransportLatched(_)));
        assert!(!receiver.has_partial());
    }

    #[tokio::test]
    async fn test_protocol_error() {
        let mock = Builder::new().read(b"?what\r\n").build();
        let mut receiver = receiver_over(mock, 64);

        let err = receiver.read_reply().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ParseError::UnknownPrefix(b'?'))
        ));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_socket_error() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut receiver = receiver_over(mock, 64);

        let err = receiver.read_reply().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
