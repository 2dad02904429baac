//! # relq Redis
//!
//! Pooled Redis access for the relq work queue.
//!
//! ## Features
//!
//! - **Connection Pooling**: one pooled connection per command, via bb8
//! - **List Commands**: push, pop, atomic tail-to-head moves (blocking and
//!   non-blocking), removal by value
//! - **Key Scans**: cursor-based `SCAN MATCH` steps
//! - **Scripts**: Lua scripts for multi-step atomic operations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relq_redis::{RedisConfig, RedisService};
//! use std::time::Duration;
//!
//! # async fn example() -> relq_redis::Result<()> {
//! let config = RedisConfig::from_env().pool_size(4).build();
//! let redis = RedisService::new(config).await?;
//!
//! redis.lpush("jobs", "hello").await?;
//! let claimed = redis
//!     .brpoplpush("jobs", "jobs:@1700000000", Duration::from_secs(1))
//!     .await?;
//! assert_eq!(claimed.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{ListConnectionManager, PoolStats, RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::RedisService;

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use relq_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::service::RedisService;
}
