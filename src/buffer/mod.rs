//! Buffer Pools
//!
//! Every socket read and write goes through a fixed-size buffer borrowed
//! from a pool. Sending and receiving use separate pools so a burst of large
//! requests can never starve replies (and vice versa).
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 BufferPools                  │
//! │  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │ send: BufferPool │  │ recv: BufferPool │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  │
//! └───────────┼─────────────────────┼────────────┘
//!             ▼                     ▼
//!          Sender(s)            Receiver(s)
//! ```
//!
//! Pools are plain values handed to each pipeline; there is no process-wide
//! instance, so independently configured clients never share buffers.

pub mod pool;

pub use pool::{Acquire, BufferPool, BufferPoolStats, BufferWaiter, PooledBuffer};

use crate::config::BufferConfig;

/// The pair of pools shared by every pipeline of one client.
#[derive(Debug, Clone)]
pub struct BufferPools {
    pub send: BufferPool,
    pub recv: BufferPool,
}

impl BufferPools {
    /// Creates both pools from a configuration (clamped to valid values).
    pub fn new(config: &BufferConfig) -> Self {
        let config = config.validated();
        Self {
            send: BufferPool::new("send", config.buffer_size, config.max_send_buffers),
            recv: BufferPool::new("recv", config.buffer_size, config.max_recv_buffers),
        }
    }
}

impl Default for BufferPools {
    fn default() -> Self {
        Self::new(&BufferConfig::default())
    }
}
