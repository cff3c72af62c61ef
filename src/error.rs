//! Client Error Types
//!
//! Every fallible operation in the crate returns [`ClientResult`]. The
//! variants fall into three groups:
//!
//! - **Fatal**: [`ClientError::Protocol`], [`ClientError::Transport`] and
//!   [`ClientError::TransportLatched`]. The pipeline that produced them moves
//!   to `FatalError` and must be discarded.
//! - **Per-request**: [`ClientError::Server`] (only produced on request via
//!   [`Reply::into_result`](crate::protocol::Reply::into_result)) and
//!   [`ClientError::Timeout`].
//! - **Usage**: closed/one-way pipelines and disposed pools.

use crate::protocol::ParseError;
use thiserror::Error;

/// Result type used throughout the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by pipelines, pools and the client facade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed RESP framing from the server
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Socket failure (connect, read or write)
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An earlier transport failure on the same socket; fails fast
    #[error("transport previously failed: {0}")]
    TransportLatched(String),

    /// Well-formed `-ERR` reply, converted on request
    #[error("server error: {0}")]
    Server(String),

    /// Command issued on a one-way or terminated pipeline
    #[error("pipeline is closed")]
    ClosedPipeline,

    /// Command issued before the pipeline connected
    #[error("pipeline is not connected")]
    NotConnected,

    /// Direct read/send issued on a pipeline still in request/response mode
    #[error("pipeline is not in one-way mode")]
    NotOneWay,

    /// Checkout or checkin against a disposed connection pool
    #[error("connection pool has been disposed")]
    PoolDisposed,

    /// A bounded wait (connect, graceful quit) ran out of time
    #[error("operation timed out")]
    Timeout,
}

impl ClientError {
    /// Returns true if this error leaves the pipeline unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_) | ClientError::Transport(_) | ClientError::TransportLatched(_)
        )
    }

    /// A description of the failure suitable for latching: later operations
    /// on the same socket report it without holding the source error.
    pub(crate) fn latch(&self) -> ClientError {
        match self {
            ClientError::TransportLatched(msg) => ClientError::TransportLatched(msg.clone()),
            other => ClientError::TransportLatched(other.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClientError::Timeout
    }
}
