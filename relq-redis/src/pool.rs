//! bb8 pool of multiplexed Redis connections.

use bb8::{ManageConnection, Pool, PooledConnection};
use redis::aio::MultiplexedConnection;
use redis::{AsyncConnectionConfig, Client};
use std::time::Duration;
use tracing::{debug, info};

use crate::{RedisConfig, RedisError, Result};

/// Connection pool type.
pub type RedisPool = Pool<ListConnectionManager>;

/// A connection checked out of the pool; it is checked back in on drop.
pub type RedisConnection<'a> = PooledConnection<'a, ListConnectionManager>;

/// Opens multiplexed connections whose response timeout comes from
/// [`RedisConfig::command_timeout`] rather than the client default.
#[derive(Clone)]
pub struct ListConnectionManager {
    client: Client,
    response_timeout: Option<Duration>,
}

impl ListConnectionManager {
    /// Create a manager for the configuration's connection URL.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.connection_url())
            .map_err(|e| RedisError::Config(e.to_string()))?;
        Ok(Self {
            client,
            response_timeout: config.response_timeout(),
        })
    }

    /// Response timeout applied to pooled connections.
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    /// Open a connection outside the pool with no response timeout, for
    /// commands that may block longer than the pooled limit.
    pub async fn connect_unbounded(&self) -> redis::RedisResult<MultiplexedConnection> {
        debug!("Opening unbounded Redis connection");
        self.client
            .get_multiplexed_async_connection_with_config(
                &AsyncConnectionConfig::new().set_response_timeout(None),
            )
            .await
    }
}

impl ManageConnection for ListConnectionManager {
    type Connection = MultiplexedConnection;
    type Error = redis::RedisError;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        self.client
            .get_multiplexed_async_connection_with_config(
                &AsyncConnectionConfig::new().set_response_timeout(self.response_timeout),
            )
            .await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        redis::cmd("PING").query_async::<()>(conn).await
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Builds a [`RedisPool`] from a [`RedisConfig`].
pub struct RedisPoolBuilder {
    config: RedisConfig,
    verify: bool,
}

impl RedisPoolBuilder {
    /// Create a new pool builder.
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            verify: true,
        }
    }

    /// Do not contact the server while building; connections are opened on
    /// first use.
    pub fn lazy(mut self) -> Self {
        self.verify = false;
        self
    }

    /// Build the pool. Unless [`lazy`](Self::lazy), the server must answer
    /// PING before the pool is returned.
    pub async fn build(self) -> Result<RedisPool> {
        self.config.validate()?;

        let manager = ListConnectionManager::new(&self.config)?;

        let builder = Pool::builder()
            .max_size(self.config.pool_size)
            .min_idle(self.config.min_idle)
            .connection_timeout(self.config.connection_timeout);

        let pool = if self.verify {
            let pool = builder
                .build(manager)
                .await
                .map_err(|e| RedisError::Connection(e.to_string()))?;
            ping(&pool).await?;
            pool
        } else {
            builder.build_unchecked(manager)
        };

        info!(
            pool_size = self.config.pool_size,
            url = %self.config.redacted_url(),
            verified = self.verify,
            "Redis connection pool created"
        );

        Ok(pool)
    }
}

/// Round-trip a PING through one pooled connection.
pub async fn ping(pool: &RedisPool) -> Result<()> {
    let mut conn = pool.get().await?;
    let reply: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    if reply != "PONG" {
        return Err(RedisError::Connection(format!(
            "unexpected PING reply: {}",
            reply
        )));
    }
    Ok(())
}

/// Connection pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections
    pub connections: u32,
    /// Open connections not checked out
    pub idle_connections: u32,
}

impl PoolStats {
    /// Connections currently checked out.
    pub fn in_use(&self) -> u32 {
        self.connections.saturating_sub(self.idle_connections)
    }
}

impl From<bb8::State> for PoolStats {
    fn from(state: bb8::State) -> Self {
        Self {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}
