//! # FlashKV Client - A Pipelined RESP Client Engine
//!
//! FlashKV Client is an asynchronous client for Redis-compatible servers.
//! Many callers share one TCP connection: requests are framed into pooled
//! buffers, flushed together, and replies are matched back to callers in
//! strict FIFO order.
//!
//! ## Features
//!
//! - **Pipelining**: Any number of requests in flight per connection
//! - **Pooled Buffers**: Bounded send/receive buffer pools with async waiters
//! - **Incremental Decoding**: Replies may arrive split at any byte
//! - **Connection Pooling**: Idle connections reused per `(endpoint, db)`
//! - **Pub/Sub**: One-way mode for subscriptions and server pushes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Client                                     │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────┐   ┌────────────────┐  │
//! │  │              ConnectionPool                  │<──│  IdleSweeper   │  │
//! │  │   (endpoint, db) -> idle pipelines           │   │ (Tokio Task)   │  │
//! │  └──────────────────────┬───────────────────────┘   └────────────────┘  │
//! │                         │ checkout / checkin                            │
//! │                         ▼                                               │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         Pipeline                                 │  │
//! │  │  ┌────────────┐   ┌──────────────────────┐   ┌────────────┐      │  │
//! │  │  │  Sender    │   │ pending FIFO         │   │  Receiver  │      │  │
//! │  │  │ FrameWriter│   │ oneshot per request  │   │ReplyDecoder│      │  │
//! │  │  └─────┬──────┘   └──────────────────────┘   └─────▲──────┘      │  │
//! │  └────────┼───────────────────────────────────────────┼─────────────┘  │
//! │           ▼                                           │                │
//! │  ┌─────────────────┐    ┌────────────┐     ┌──────────┴──────┐         │
//! │  │ send BufferPool │───>│ TCP socket │────>│ recv BufferPool │         │
//! │  └─────────────────┘    └────────────┘     └─────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashkv_client::{Client, ClientConfig, Command};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::new(ClientConfig::new("127.0.0.1", 6379));
//!
//!     client.execute(&Command::new("SET").arg("name").arg("Ariz")).await?;
//!     let name = client.execute(&Command::new("GET").arg("name")).await?;
//!     println!("{:?}", name.as_str());
//!
//!     // Many requests, one flush
//!     let conn = client.connection().await?;
//!     let replies = conn
//!         .execute_batch(&[Command::new("INCR").arg("hits"), Command::new("PING")])
//!         .await?;
//!     client.release(conn);
//!
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP reply types, command framing and the incremental decoder
//! - [`buffer`]: Bounded pools of fixed-size I/O buffers
//! - [`transport`]: Socket connect and split read/write halves
//! - [`pipeline`]: The pipelined connection with FIFO reply matching
//! - [`pool`]: Connection pooling and idle eviction
//! - [`client`]: Pooled facade for the common case
//! - [`config`]: Endpoints, buffer and pool settings
//! - [`error`]: The crate error type
//!
//! ## Design Highlights
//!
//! ### Caller-Driven Reads
//!
//! There is no background reader task. Whichever caller is waiting takes the
//! receive lock, reads one reply and hands it to the oldest pending request.
//! Callers whose reply arrived through someone else's read wake up without
//! touching the socket.
//!
//! ### Fatal vs. Server Errors
//!
//! A `-ERR` reply fails only its own request. A transport or protocol
//! failure fails the whole connection: the request at the head of the queue
//! sees the real error and everything behind it sees
//! [`ClientError::ClosedPipeline`].

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use buffer::{BufferPool, BufferPools};
pub use client::Client;
pub use config::{BufferConfig, ClientConfig, Endpoint, PoolConfig};
pub use error::{ClientError, ClientResult};
pub use pipeline::{ConnectionState, Pipeline, PubSubMessage};
pub use pool::{ConnectionPool, PoolKey, PooledConnection};
pub use protocol::{Command, ParseError, Reply, ReplyDecoder};

/// The default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// The default host to connect to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of FlashKV Client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
