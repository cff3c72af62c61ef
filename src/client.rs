//! Client Facade
//!
//! [`Client`] ties the pieces together for the common case: one server, a
//! shared pair of buffer pools and a connection pool in front of it.
//!
//! ```text
//!   Client::execute(cmd)
//!        │
//!        ├──> pool.checkout((endpoint, db))   reuse or connect + AUTH + SELECT
//!        ├──> pipeline.execute(cmd)
//!        └──> pool.checkin(pipeline)          healthy ones go back to idle
//! ```
//!
//! Callers that want many requests in flight on one connection check out a
//! [`PooledConnection`] and use the [`Pipeline`] directly.

use crate::buffer::{BufferPoolStats, BufferPools};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::pipeline::Pipeline;
use crate::pool::{ConnectionFactory, ConnectionPool, PoolKey, PooledConnection, TcpConnectionFactory};
use crate::protocol::{Command, IntoArg, Reply};
use tracing::{debug, info};

/// A pooled client for one Redis server.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    buffers: BufferPools,
    factory: TcpConnectionFactory,
    pool: ConnectionPool<TcpConnectionFactory>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let buffers = BufferPools::new(&config.buffers);
        let factory = TcpConnectionFactory::new(&config, buffers.clone());
        let pool = ConnectionPool::new(factory.clone(), config.pool.clone());
        info!(endpoint = %config.endpoint, db = config.db, "Client created");
        Self {
            config,
            buffers,
            factory,
            pool,
        }
    }

    /// Runs one command on a pooled connection.
    pub async fn execute(&self, command: &Command) -> ClientResult<Reply> {
        let conn = self.pool.checkout(&self.default_key()).await?;
        let result = conn.execute(command).await;
        self.release(conn);
        result
    }

    /// Runs several commands on one pooled connection with a single flush.
    pub async fn execute_batch(&self, commands: &[Command]) -> ClientResult<Vec<ClientResult<Reply>>> {
        let conn = self.pool.checkout(&self.default_key()).await?;
        let result = conn.execute_batch(commands).await;
        self.release(conn);
        result
    }

    /// Checks out a connection for exclusive pipelined use.
    ///
    /// Hand it back with [`release`](Client::release).
    pub async fn connection(&self) -> ClientResult<PooledConnection> {
        self.pool.checkout(&self.default_key()).await
    }

    /// Checks out a connection to another database on the same server.
    pub async fn connection_for_db(&self, db: i64) -> ClientResult<PooledConnection> {
        self.pool
            .checkout(&PoolKey::new(self.config.endpoint.clone(), db))
            .await
    }

    /// Returns a connection to the pool. Unhealthy connections are closed.
    pub fn release(&self, conn: PooledConnection) {
        if let Err(ClientError::PoolDisposed) = self.pool.checkin(conn) {
            debug!("Connection released after pool disposal, closed");
        }
    }

    /// Opens a dedicated connection subscribed to `channels`.
    ///
    /// Subscribed connections are one-way and never enter the pool.
    pub async fn subscribe<I, A>(&self, channels: I) -> ClientResult<Pipeline>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let pipeline = self.factory.create(&self.default_key()).await?;
        pipeline.subscribe(channels).await?;
        Ok(pipeline)
    }

    /// Opens a dedicated connection subscribed to channel `patterns`.
    pub async fn psubscribe<I, A>(&self, patterns: I) -> ClientResult<Pipeline>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let pipeline = self.factory.create(&self.default_key()).await?;
        pipeline.psubscribe(patterns).await?;
        Ok(pipeline)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool<TcpConnectionFactory> {
        &self.pool
    }

    /// Occupancy of the send and receive buffer pools.
    pub fn buffer_stats(&self) -> (BufferPoolStats, BufferPoolStats) {
        (self.buffers.send.stats(), self.buffers.recv.stats())
    }

    /// Closes every pooled connection. Later calls fail with
    /// [`ClientError::PoolDisposed`].
    pub async fn dispose(&self) {
        self.pool.dispose().await;
    }

    fn default_key(&self) -> PoolKey {
        PoolKey::new(self.config.endpoint.clone(), self.config.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ConnectionState, PubSubMessage};
    use crate::test_support::MockServer;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    async fn client_for(server: &MockServer) -> Client {
        let endpoint = server.listen().await;
        Client::new(ClientConfig::new(endpoint.host, endpoint.port))
    }

    #[tokio::test]
    async fn test_execute_reuses_one_connection() {
        let server = MockServer::new();
        let client = client_for(&server).await;

        for i in 1..=5 {
            let reply = client.execute(&Command::new("INCR").arg("hits")).await.unwrap();
            assert_eq!(reply, Reply::Integer(i));
        }
        assert_eq!(server.connections(), 1);
        assert_eq!(client.pool().stats().reused.load(Ordering::Relaxed), 4);
        assert_eq!(client.pool().idle_count(&client.default_key()), 1);
    }

    #[tokio::test]
    async fn test_execute_batch() {
        let server = MockServer::new();
        let client = client_for(&server).await;

        let commands = vec![
            Command::new("SET").arg("a").arg(10),
            Command::new("INCR").arg("a"),
            Command::new("GET").arg("a"),
        ];
        let replies: Vec<Reply> = client
            .execute_batch(&commands)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(replies, vec![Reply::ok(), Reply::Integer(11), Reply::bulk("11")]);
    }

    #[tokio::test]
    async fn test_concurrent_executes_share_the_pool() {
        let server = MockServer::new();
        let client = Arc::new(client_for(&server).await);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    client.execute(&Command::new("INCR").arg("n")).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let reply = client.execute(&Command::new("GET").arg("n")).await.unwrap();
        assert_eq!(reply, Reply::bulk("200"));
        assert!(server.connections() <= 8);
    }

    #[tokio::test]
    async fn test_connection_for_db_selects() {
        let server = MockServer::new();
        let client = client_for(&server).await;

        let conn = client.connection_for_db(5).await.unwrap();
        assert_eq!(conn.key().db, 5);
        client.release(conn);

        assert!(server.commands().contains(&vec!["SELECT".to_string(), "5".to_string()]));
    }

    #[tokio::test]
    async fn test_subscribe_gets_dedicated_connection() {
        let server = MockServer::new();
        let client = client_for(&server).await;

        let subscriber = client.subscribe(["events"]).await.unwrap();
        assert_eq!(subscriber.state(), ConnectionState::Subscribed);
        assert!(matches!(
            subscriber.next_message().await.unwrap(),
            PubSubMessage::Subscribe { count: 1, .. }
        ));
        assert_eq!(client.pool().total_idle(), 0);
    }

    #[tokio::test]
    async fn test_dispose_rejects_new_work() {
        let server = MockServer::new();
        let client = client_for(&server).await;

        client.execute(&Command::new("PING")).await.unwrap();
        client.dispose().await;

        let err = client.execute(&Command::new("PING")).await.unwrap_err();
        assert!(matches!(err, ClientError::PoolDisposed));
    }

    #[tokio::test]
    async fn test_buffers_return_after_use() {
        let server = MockServer::new();
        let client = client_for(&server).await;

        client.execute(&Command::new("PING")).await.unwrap();
        let (send, recv) = client.buffer_stats();
        // The pooled connection is idle and holds neither kind of buffer
        assert_eq!(send.outstanding, 0);
        assert_eq!(recv.outstanding, 0);
        assert_eq!(client.pool().total_idle(), 1);
    }
}
