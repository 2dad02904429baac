//! List store abstraction and its Redis implementation.
//!
//! The transport only needs a handful of list primitives from the remote
//! store. They are collected in [`ListStore`] so the queue can run against
//! Redis in production and [`MemoryListStore`](crate::memory::MemoryListStore)
//! in tests. "Head" is the left end of a list, "tail" the right end.

use async_trait::async_trait;
use relq_redis::RedisService;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueueResult;

/// Remote list-store operations used by the transport queue.
///
/// Implementations must make each single call atomic with respect to other
/// calls on the same lists.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Push `value` onto the head of `list`.
    async fn push_head(&self, list: &str, value: &str) -> QueueResult<()>;

    /// Pop from the tail of `list`; `None` when empty.
    async fn pop_tail(&self, list: &str) -> QueueResult<Option<String>>;

    /// Move the tail of `source` to the head of `destination`.
    async fn move_tail_to_head(
        &self,
        source: &str,
        destination: &str,
    ) -> QueueResult<Option<String>>;

    /// Like [`move_tail_to_head`](Self::move_tail_to_head), waiting up to
    /// `timeout_secs` for `source` to become non-empty. Zero waits forever.
    async fn blocking_move_tail_to_head(
        &self,
        source: &str,
        destination: &str,
        timeout_secs: u64,
    ) -> QueueResult<Option<String>>;

    /// Remove one occurrence of `value`, searching from the head. Returns
    /// the number removed (0 or 1).
    async fn remove_value(&self, list: &str, value: &str) -> QueueResult<usize>;

    /// Atomically remove one occurrence of `value` from `source` and push it
    /// onto the head of `destination`. Returns false if it was not found.
    async fn move_value(
        &self,
        source: &str,
        destination: &str,
        value: &str,
    ) -> QueueResult<bool>;

    /// One cursor step over key names matching a glob `pattern`.
    ///
    /// Returns the next cursor, 0 once the scan is complete, and the matches
    /// found in this step, which may be empty even mid-scan.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> QueueResult<(u64, Vec<String>)>;

    /// Length of `list` (0 if absent).
    async fn len(&self, list: &str) -> QueueResult<usize>;

    /// Whole contents of `list`, head first.
    async fn range(&self, list: &str) -> QueueResult<Vec<String>>;
}

/// KEYS[1] source, KEYS[2] destination, ARGV[1] value.
const MOVE_VALUE_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
    redis.call('LPUSH', KEYS[2], ARGV[1])
end
return removed
"#;

/// [`ListStore`] backed by a pooled Redis service.
#[derive(Clone)]
pub struct RedisListStore {
    redis: Arc<RedisService>,
    move_value_script: Arc<redis::Script>,
}

impl RedisListStore {
    /// Wrap a Redis service.
    pub fn new(redis: Arc<RedisService>) -> Self {
        Self {
            redis,
            move_value_script: Arc::new(redis::Script::new(MOVE_VALUE_SCRIPT)),
        }
    }

    /// The underlying service.
    pub fn service(&self) -> &Arc<RedisService> {
        &self.redis
    }
}

#[async_trait]
impl ListStore for RedisListStore {
    async fn push_head(&self, list: &str, value: &str) -> QueueResult<()> {
        self.redis.lpush(list, value).await?;
        Ok(())
    }

    async fn pop_tail(&self, list: &str) -> QueueResult<Option<String>> {
        Ok(self.redis.rpop(list).await?)
    }

    async fn move_tail_to_head(
        &self,
        source: &str,
        destination: &str,
    ) -> QueueResult<Option<String>> {
        Ok(self.redis.rpoplpush(source, destination).await?)
    }

    async fn blocking_move_tail_to_head(
        &self,
        source: &str,
        destination: &str,
        timeout_secs: u64,
    ) -> QueueResult<Option<String>> {
        Ok(self
            .redis
            .brpoplpush(source, destination, Duration::from_secs(timeout_secs))
            .await?)
    }

    async fn remove_value(&self, list: &str, value: &str) -> QueueResult<usize> {
        Ok(self.redis.lrem(list, 1, value).await? as usize)
    }

    async fn move_value(
        &self,
        source: &str,
        destination: &str,
        value: &str,
    ) -> QueueResult<bool> {
        let removed: i64 = self
            .redis
            .eval(&self.move_value_script, &[source, destination], &[value])
            .await?;
        Ok(removed > 0)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> QueueResult<(u64, Vec<String>)> {
        Ok(self.redis.scan_match(cursor, pattern, count).await?)
    }

    async fn len(&self, list: &str) -> QueueResult<usize> {
        Ok(self.redis.llen(list).await? as usize)
    }

    async fn range(&self, list: &str) -> QueueResult<Vec<String>> {
        Ok(self.redis.lrange(list).await?)
    }
}
