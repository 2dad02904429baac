//! Pooled Redis service exposing the list and scan commands a queue needs.
//!
//! Every method checks a connection out of the pool for the duration of one
//! command and hands it back on return, error or not. A blocking pop that
//! could outlast the pooled response timeout runs on a connection of its own.

use redis::AsyncCommands;
use std::time::Duration;

use crate::{
    RedisConfig, Result,
    pool::{self, ListConnectionManager, PoolStats, RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Headroom kept between a blocking pop's server-side timeout and the
/// client response timeout.
const BLOCKING_HEADROOM: Duration = Duration::from_secs(1);

/// Redis service providing a connection pool and list commands.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
    blocking: ListConnectionManager,
}

impl RedisService {
    /// Connect using the given configuration.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Self::from_pool(config, pool)
    }

    /// Create from an existing pool built from the same configuration.
    pub fn from_pool(config: RedisConfig, pool: RedisPool) -> Result<Self> {
        let blocking = ListConnectionManager::new(&config)?;
        Ok(Self {
            config,
            pool,
            blocking,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        Ok(self.pool.get().await?)
    }

    /// Check if the server answers.
    pub async fn health_check(&self) -> Result<()> {
        pool::ping(&self.pool).await
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.state().into()
    }

    /// LPUSH a single value; returns the new list length.
    pub async fn lpush<T: redis::ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        value: T,
    ) -> Result<u64> {
        let mut conn = self.get().await?;
        let len: u64 = conn.lpush(key, value).await?;
        Ok(len)
    }

    /// RPOP one value.
    pub async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get().await?;
        let value: Option<String> = conn.rpop(key, None).await?;
        Ok(value)
    }

    /// RPOPLPUSH: move the tail of `source` to the head of `destination`.
    pub async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>> {
        let mut conn = self.get().await?;
        let value: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(source)
            .arg(destination)
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    /// BRPOPLPUSH with a timeout in whole seconds.
    ///
    /// A zero timeout blocks until an element arrives. `None` means the
    /// timeout elapsed with `source` still empty.
    pub async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let mut cmd = redis::cmd("BRPOPLPUSH");
        cmd.arg(source).arg(destination).arg(timeout.as_secs());

        let value: Option<String> = if self.fits_pooled(timeout) {
            let mut conn = self.get().await?;
            cmd.query_async(&mut *conn).await?
        } else {
            let mut conn = self.blocking.connect_unbounded().await?;
            cmd.query_async(&mut conn).await?
        };
        Ok(value)
    }

    /// Whether a command blocking server-side for `block` can share a pooled
    /// connection without tripping its response timeout.
    fn fits_pooled(&self, block: Duration) -> bool {
        match self.config.response_timeout() {
            None => true,
            Some(limit) => {
                !block.is_zero()
                    && Duration::from_secs(block.as_secs()) + BLOCKING_HEADROOM <= limit
            }
        }
    }

    /// LREM: remove up to `count` occurrences of `value` (0 removes all).
    pub async fn lrem<T: redis::ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        count: isize,
        value: T,
    ) -> Result<u64> {
        let mut conn = self.get().await?;
        let removed: u64 = conn.lrem(key, count, value).await?;
        Ok(removed)
    }

    /// LLEN.
    pub async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.get().await?;
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    /// LRANGE over the whole list, head first.
    pub async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.get().await?;
        let items: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(items)
    }

    /// One SCAN step; returns the next cursor (0 when done) and the keys
    /// matched in this step, possibly none.
    pub async fn scan_match(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.get().await?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut *conn)
            .await?;
        Ok((next, keys))
    }

    /// Execute a Lua script.
    pub async fn eval<T: redis::FromRedisValue>(
        &self,
        script: &redis::Script,
        keys: &[&str],
        args: &[&str],
    ) -> Result<T> {
        let mut conn = self.get().await?;
        let result: T = script
            .key(keys)
            .arg(args)
            .invoke_async(&mut *conn)
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_pool_keeps_config() {
        let config = RedisConfig::builder().pool_size(2).min_idle(0).build();
        let pool = RedisPoolBuilder::new(config.clone()).lazy().build().await.unwrap();
        let redis = RedisService::from_pool(config.clone(), pool).unwrap();

        assert_eq!(redis.config(), &config);
        assert_eq!(redis.pool_stats().connections, 0);
    }

    async fn lazy_service(config: RedisConfig) -> RedisService {
        let pool = RedisPoolBuilder::new(config.clone()).lazy().build().await.unwrap();
        RedisService::from_pool(config, pool).unwrap()
    }

    #[tokio::test]
    async fn test_short_blocking_pops_share_the_pool() {
        let redis = lazy_service(RedisConfig::builder().min_idle(0).build()).await;

        assert!(redis.fits_pooled(Duration::from_secs(1)));
        assert!(redis.fits_pooled(Duration::from_secs(29)));
        assert!(!redis.fits_pooled(Duration::from_secs(30)));
        // Blocking forever never fits a bounded connection.
        assert!(!redis.fits_pooled(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_unbounded_config_always_uses_the_pool() {
        let config = RedisConfig::builder()
            .min_idle(0)
            .command_timeout(Duration::ZERO)
            .build();
        let redis = lazy_service(config).await;

        assert!(redis.fits_pooled(Duration::ZERO));
        assert!(redis.fits_pooled(Duration::from_secs(3600)));
    }

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_list_move_round_trip() {
        let redis = RedisService::new(RedisConfig::new(redis_url())).await.unwrap();
        let (src, dst) = ("relq:test:svc:src", "relq:test:svc:dst");

        redis.lpush(src, "a").await.unwrap();
        redis.lpush(src, "b").await.unwrap();

        let moved = redis.brpoplpush(src, dst, Duration::from_secs(1)).await.unwrap();
        assert_eq!(moved.as_deref(), Some("a"));
        assert_eq!(redis.lrange(dst).await.unwrap(), vec!["a".to_string()]);

        assert_eq!(redis.lrem(dst, 1, "a").await.unwrap(), 1);
        assert_eq!(redis.rpop(src).await.unwrap().as_deref(), Some("b"));
        assert_eq!(redis.rpop(src).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_brpoplpush_times_out_on_empty_list() {
        let redis = RedisService::new(RedisConfig::new(redis_url())).await.unwrap();
        let moved = redis
            .brpoplpush("relq:test:svc:empty", "relq:test:svc:sink", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(moved, None);
    }
}
