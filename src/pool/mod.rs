//! Connection Pool Module
//!
//! Reuses live pipelines across requests and closes the ones left idle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConnectionPool                          │
//! │  ┌──────────────────┐ ┌──────────────────┐                  │
//! │  │ (host:6379, db0) │ │ (host:6379, db3) │  ...             │
//! │  │ idle VecDeque    │ │ idle VecDeque    │                  │
//! │  └──────────────────┘ └──────────────────┘                  │
//! └─────────────────────────────────────────────────────────────┘
//!            ▲                          ▲
//!            │ create                   │ evict
//!  ┌─────────┴──────────┐     ┌─────────┴─────────┐
//!  │ ConnectionFactory  │     │   IdleSweeper     │
//!  │ (TCP + AUTH/SELECT)│     │ (Background Task) │
//!  └────────────────────┘     └───────────────────┘
//! ```

pub mod connection_pool;
pub mod sweeper;

// Re-export commonly used types
pub use connection_pool::{
    ConnectionFactory, ConnectionPool, PoolKey, PoolStats, PooledConnection, TcpConnectionFactory,
};
pub use sweeper::IdleSweeper;
