//! Client Configuration
//!
//! All tunables live in [`ClientConfig`]. Nothing is read from the
//! environment or parsed from URLs; callers build the struct directly,
//! usually starting from `Default`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

/// Smallest buffer size accepted.
///
/// A command frame is written in atomic units of at most
/// [`MAX_HEADER_LEN`](crate::protocol::MAX_HEADER_LEN) bytes; a buffer that
/// cannot hold one would never make progress.
pub const MIN_BUFFER_SIZE: usize = 64;

/// Default size of each pooled buffer
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Host and port of a Redis server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `host:port` form accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HOST, crate::DEFAULT_PORT)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Sizing of the send and receive buffer pools.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Bytes per buffer (default: 4096, minimum: 64)
    pub buffer_size: usize,

    /// Maximum send buffers in circulation (default: 256)
    pub max_send_buffers: usize,

    /// Maximum receive buffers in circulation (default: 256)
    pub max_recv_buffers: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_send_buffers: 256,
            max_recv_buffers: 256,
        }
    }
}

impl BufferConfig {
    /// Returns a copy with out-of-range values clamped.
    pub fn validated(&self) -> Self {
        let mut config = self.clone();
        if config.buffer_size < MIN_BUFFER_SIZE {
            warn!(
                requested = config.buffer_size,
                minimum = MIN_BUFFER_SIZE,
                "Buffer size too small, clamping"
            );
            config.buffer_size = MIN_BUFFER_SIZE;
        }
        config.max_send_buffers = config.max_send_buffers.max(1);
        config.max_recv_buffers = config.max_recv_buffers.max(1);
        config
    }
}

/// Behavior of the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle connections kept per (endpoint, db) key (default: 16)
    pub max_idle_per_key: usize,

    /// How long a connection may sit idle before eviction (default: 60s)
    pub idle_timeout: Duration,

    /// Interval between idle sweeps (default: 1s)
    pub sweep_interval: Duration,

    /// Time allowed for a graceful QUIT before forcing the close (default: 2s)
    pub quit_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_key: 16,
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            quit_timeout: Duration::from_secs(2),
        }
    }
}

/// Top-level client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Server to connect to
    pub endpoint: Endpoint,

    /// Database selected on new connections
    pub db: i64,

    /// Connect timeout; `None` waits for the OS
    pub connect_timeout: Option<Duration>,

    /// Password sent with AUTH after connecting
    pub password: Option<String>,

    /// ACL username (Redis 6+), used only together with `password`
    pub username: Option<String>,

    pub buffers: BufferConfig,

    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            db: 0,
            connect_timeout: Some(Duration::from_secs(5)),
            password: None,
            username: None,
            buffers: BufferConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("db", &self.db)
            .field("connect_timeout", &self.connect_timeout)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("buffers", &self.buffers)
            .field("pool", &self.pool)
            .finish()
    }
}

impl ClientConfig {
    /// Default configuration pointed at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            ..Default::default()
        }
    }
}
