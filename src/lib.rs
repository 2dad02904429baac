// relq - A reliable work queue over remote lists
//
// Producers push type-tagged envelopes onto a shared list; consumers claim
// them into private lists, dispatch them to typed handlers, and acknowledge
// on success. Work stranded by a crashed consumer is returned by recovery.

// Re-export core functionality
pub use relq_queue::*;

// Re-export member crates
pub use relq_log;
pub use relq_queue;

#[cfg(feature = "redis")]
pub use relq_redis;

// Re-export the cancellation signal taken by `Dispatcher::run`
pub use tokio_util::sync::CancellationToken;

/// Commonly used types and traits.
pub mod prelude {
    pub use relq_queue::prelude::*;
    pub use relq_queue::{Backoff, Envelope, HandlerRegistry, MemoryListStore};
    pub use tokio_util::sync::CancellationToken;

    #[cfg(feature = "redis")]
    pub use relq_redis::{RedisConfig, RedisService};
}
