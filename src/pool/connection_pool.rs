//! Connection Pool
//!
//! Keeps idle, healthy pipelines per `(endpoint, db)` key so callers can
//! reuse connections instead of paying a TCP handshake (plus AUTH/SELECT)
//! per request.
//!
//! ```text
//!   checkout(key) ──> idle[key].pop_back() ── hit ──> PooledConnection
//!                          │ miss
//!                          └──> factory.create(key)
//!
//!   checkin(conn) ──> unhealthy ────────────────────> dropped
//!                 ──> idle[key] full ───────────────> QUIT (spawned)
//!                 ──> idle[key].push_back((conn, now))
//!
//!   sweeper tick  ──> idle[key].pop_front() while age >= idle_timeout ──> QUIT
//! ```
//!
//! Entries are appended in return order, so each queue is sorted by age and
//! eviction stops at the first fresh entry.

use super::sweeper::IdleSweeper;
use crate::buffer::BufferPools;
use crate::config::{ClientConfig, Endpoint, PoolConfig};
use crate::error::{ClientError, ClientResult};
use crate::pipeline::{ConnectionState, Pipeline};
use crate::protocol::Command;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Identifies interchangeable connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub endpoint: Endpoint,
    pub db: i64,
}

impl PoolKey {
    pub fn new(endpoint: Endpoint, db: i64) -> Self {
        Self { endpoint, db }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.endpoint, self.db)
    }
}

/// Builds ready-to-use pipelines for the pool.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Opens a connection for `key` and prepares it (authentication,
    /// database selection). The returned pipeline must be `Connected`.
    fn create(&self, key: &PoolKey) -> impl Future<Output = ClientResult<Pipeline>> + Send;
}

/// Opens TCP connections, then sends AUTH and SELECT as configured.
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    pools: BufferPools,
    connect_timeout: Option<Duration>,
    username: Option<String>,
    password: Option<String>,
}

impl TcpConnectionFactory {
    pub fn new(config: &ClientConfig, pools: BufferPools) -> Self {
        Self {
            pools,
            connect_timeout: config.connect_timeout,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    async fn prepare(&self, pipeline: &Pipeline, key: &PoolKey) -> ClientResult<()> {
        if let Some(password) = &self.password {
            let mut auth = Command::new("AUTH");
            if let Some(username) = &self.username {
                auth.push_arg(username);
            }
            auth.push_arg(password);
            pipeline.execute(&auth).await?.into_result()?;
        }
        if key.db != 0 {
            let select = Command::new("SELECT").arg(key.db);
            pipeline.execute(&select).await?.into_result()?;
        }
        Ok(())
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn create(&self, key: &PoolKey) -> impl Future<Output = ClientResult<Pipeline>> + Send {
        async move {
            let pipeline = Pipeline::new(key.endpoint.clone(), self.pools.clone())
                .with_connect_timeout(self.connect_timeout);
            pipeline.connect().await?;

            if let Err(err) = self.prepare(&pipeline, key).await {
                pipeline.disconnect().await;
                return Err(err);
            }
            Ok(pipeline)
        }
    }
}

/// A pipeline checked out of a [`ConnectionPool`].
///
/// Dereferences to the [`Pipeline`]. Hand it back with
/// [`ConnectionPool::checkin`]; dropping it closes the connection instead.
pub struct PooledConnection {
    key: PoolKey,
    pipeline: Pipeline,
}

impl PooledConnection {
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Detaches the pipeline from the pool for good.
    pub fn into_pipeline(self) -> Pipeline {
        self.pipeline
    }
}

impl Deref for PooledConnection {
    type Target = Pipeline;

    fn deref(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// Counters for one pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Connections opened through the factory
    pub created: AtomicU64,
    /// Checkouts served from the idle queues
    pub reused: AtomicU64,
    /// Idle connections closed by the sweeper
    pub evicted: AtomicU64,
    /// Connections closed on checkin (unhealthy or over capacity)
    pub destroyed: AtomicU64,
}

struct IdleEntry {
    pipeline: Pipeline,
    returned_at: Instant,
}

/// State shared between the pool handle and its sweeper.
pub(crate) struct PoolShared<F> {
    factory: F,
    config: PoolConfig,
    idle: Mutex<HashMap<PoolKey, VecDeque<IdleEntry>>>,
    disposed: AtomicBool,
    stats: PoolStats,
}

impl<F> PoolShared<F> {
    fn lock_idle(&self) -> MutexGuard<'_, HashMap<PoolKey, VecDeque<IdleEntry>>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Closes every idle entry whose age has reached the idle timeout.
    ///
    /// Each closure is a graceful QUIT on its own task; failures are only
    /// logged. Returns the number of entries evicted.
    pub(crate) fn evict_idle(&self, now: Instant) -> usize {
        let timeout = self.config.idle_timeout;
        let mut expired = Vec::new();
        {
            let mut idle = self.lock_idle();
            for queue in idle.values_mut() {
                while let Some(entry) = queue.front() {
                    if now.saturating_duration_since(entry.returned_at) < timeout {
                        break;
                    }
                    if let Some(entry) = queue.pop_front() {
                        expired.push(entry.pipeline);
                    }
                }
            }
            idle.retain(|_, queue| !queue.is_empty());
        }

        let count = expired.len();
        self.stats.evicted.fetch_add(count as u64, Ordering::Relaxed);
        for pipeline in expired {
            debug!(pipeline = pipeline.id(), endpoint = %pipeline.endpoint(), "Evicting idle connection");
            close_gracefully(pipeline, self.config.quit_timeout);
        }
        count
    }
}

/// Sends QUIT on a background task, forcing the close on timeout.
fn close_gracefully(pipeline: Pipeline, timeout: Duration) {
    tokio::spawn(async move {
        if let Err(e) = pipeline.quit(timeout).await {
            debug!(pipeline = pipeline.id(), error = %e, "Graceful close failed");
        }
    });
}

/// Pool of reusable pipelines keyed by `(endpoint, db)`.
///
/// Must be created inside a Tokio runtime: the idle sweeper runs as a task
/// and stops when the pool is dropped or disposed.
pub struct ConnectionPool<F: ConnectionFactory = TcpConnectionFactory> {
    shared: Arc<PoolShared<F>>,
    pub(crate) sweeper: IdleSweeper,
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("idle", &self.total_idle())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Creates an empty pool and starts its idle sweeper.
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let sweep_interval = config.sweep_interval;
        let shared = Arc::new(PoolShared {
            factory,
            config,
            idle: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
            stats: PoolStats::default(),
        });
        let sweeper = IdleSweeper::start(Arc::downgrade(&shared), sweep_interval);
        info!(
            max_idle_per_key = shared.config.max_idle_per_key,
            idle_timeout_ms = shared.config.idle_timeout.as_millis() as u64,
            "Connection pool started"
        );
        Self { shared, sweeper }
    }

    /// Hands out an idle pipeline for `key`, or opens a new one.
    pub async fn checkout(&self, key: &PoolKey) -> ClientResult<PooledConnection> {
        if self.is_disposed() {
            return Err(ClientError::PoolDisposed);
        }

        // Most recently returned first; the oldest entries age out.
        loop {
            let entry = self.shared.lock_idle().get_mut(key).and_then(|q| q.pop_back());
            match entry {
                Some(entry) if entry.pipeline.state() == ConnectionState::Connected => {
                    self.shared.stats.reused.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledConnection {
                        key: key.clone(),
                        pipeline: entry.pipeline,
                    });
                }
                Some(entry) => {
                    self.shared.stats.destroyed.fetch_add(1, Ordering::Relaxed);
                    drop(entry);
                }
                None => break,
            }
        }

        let pipeline = self.shared.factory.create(key).await?;
        self.shared.stats.created.fetch_add(1, Ordering::Relaxed);
        debug!(pipeline = pipeline.id(), key = %key, "Opened pooled connection");

        if self.is_disposed() {
            pipeline.disconnect().await;
            return Err(ClientError::PoolDisposed);
        }
        Ok(PooledConnection {
            key: key.clone(),
            pipeline,
        })
    }

    /// Returns a pipeline to the pool.
    ///
    /// A pipeline that is not `Connected`, is in one-way mode or still has
    /// requests in flight is dropped. If the key's queue is full the
    /// connection is closed with a graceful QUIT.
    pub fn checkin(&self, conn: PooledConnection) -> ClientResult<()> {
        if self.is_disposed() {
            return Err(ClientError::PoolDisposed);
        }

        let PooledConnection { key, pipeline } = conn;
        if pipeline.state() != ConnectionState::Connected
            || pipeline.is_one_way()
            || pipeline.pending_count() > 0
        {
            debug!(
                pipeline = pipeline.id(),
                state = %pipeline.state(),
                "Dropping unhealthy connection"
            );
            self.shared.stats.destroyed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let overflow = {
            let mut idle = self.shared.lock_idle();
            let queue = idle.entry(key).or_default();
            if queue.len() >= self.shared.config.max_idle_per_key {
                Some(pipeline)
            } else {
                queue.push_back(IdleEntry {
                    pipeline,
                    returned_at: Instant::now(),
                });
                None
            }
        };

        if let Some(pipeline) = overflow {
            debug!(pipeline = pipeline.id(), "Idle queue full, closing connection");
            self.shared.stats.destroyed.fetch_add(1, Ordering::Relaxed);
            close_gracefully(pipeline, self.shared.config.quit_timeout);
        }
        Ok(())
    }

    /// Stops the sweeper and force-closes every idle connection. Later
    /// checkouts and checkins fail with [`ClientError::PoolDisposed`].
    pub async fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sweeper.stop();

        let entries: Vec<IdleEntry> = self
            .shared
            .lock_idle()
            .drain()
            .flat_map(|(_, queue)| queue)
            .collect();
        let closed = entries.len();
        for entry in entries {
            entry.pipeline.disconnect().await;
        }
        info!(closed, "Connection pool disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Idle connections currently held for `key`.
    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.shared.lock_idle().get(key).map_or(0, VecDeque::len)
    }

    /// Idle connections across all keys.
    pub fn total_idle(&self) -> usize {
        self.shared.lock_idle().values().map(VecDeque::len).sum()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Runs one eviction pass as of `now`.
    pub fn evict_idle(&self, now: Instant) -> usize {
        self.shared.evict_idle(now)
    }
}
