//! Reliable work queue over remote lists.
//!
//! Provides an at-least-once work queue with:
//! - 📦 Redis list storage (or in-memory for tests)
//! - 🔒 Claim into a per-consumer private list, acknowledge by identity
//! - 🔄 Crash recovery of orphaned private lists
//! - 🏷️ Type-tagged envelopes routed to typed handlers
//! - 👷 Bounded concurrent dispatch with panic containment
//! - 💀 Dead letter list for items that can never be handled
//!
//! ## Envelopes
//!
//! ```
//! use relq_queue::{Envelope, encode};
//!
//! let raw = encode("time", "2024-01-01T00:00:00Z").unwrap();
//! assert_eq!(raw, "time#|2024-01-01T00:00:00Z");
//!
//! let envelope = Envelope::decode(&raw).unwrap();
//! assert_eq!(envelope.type_tag, "time");
//! assert_eq!(envelope.payload, "2024-01-01T00:00:00Z");
//! ```
//!
//! ## Transport
//!
//! ```
//! use relq_queue::{MemoryListStore, TransportConfig, TransportQueue};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> relq_queue::QueueResult<()> {
//! let store = Arc::new(MemoryListStore::new());
//! let queue = TransportQueue::new(store, TransportConfig::new("jobs"))?;
//!
//! queue.push("first").await?;
//! let claim = queue.pop(1).await?;
//! assert_eq!(claim.value, "first");
//!
//! queue.acknowledge_claim(&claim).await?;
//! assert_eq!(queue.stats().await?.in_flight, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use relq_queue::*;
//! use relq_redis::{RedisConfig, RedisService};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let redis = Arc::new(RedisService::new(RedisConfig::from_env().build()).await?);
//!     let store = Arc::new(RedisListStore::new(redis));
//!     let transport = Arc::new(TransportQueue::new(store, TransportConfig::new("emails"))?);
//!
//!     // Return work left behind by crashed consumers
//!     transport.recover(0).await?;
//!
//!     let dispatcher = Dispatcher::with_config(transport, DispatcherConfig::from_env());
//!     dispatcher.register_json("send", |msg: serde_json::Value| async move {
//!         println!("sending {}", msg);
//!         true
//!     })?;
//!
//!     dispatcher
//!         .push_json("send", &serde_json::json!({"to": "user@example.com"}))
//!         .await?;
//!
//!     let cancel = CancellationToken::new();
//!     dispatcher.run(cancel).await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod memory;
pub mod store;
pub mod transport;

pub use backoff::Backoff;
pub use dispatcher::{Dispatcher, DispatcherConfig, RejectPolicy};
pub use envelope::{Envelope, MARKER, encode, is_envelope};
pub use error::{QueueError, QueueResult};
pub use handler::{
    AckPolicy, ErasedHandler, FnHandler, Handler, HandlerOutcome, HandlerRegistry, JsonHandler,
};
pub use memory::MemoryListStore;
pub use store::{ListStore, RedisListStore};
pub use transport::{
    Claim, PRIVATE_SEPARATOR, QueueStats, RecoveryReport, TransportConfig, TransportQueue,
    parse_private_key,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::dispatcher::{Dispatcher, DispatcherConfig, RejectPolicy};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::handler::{AckPolicy, Handler};
    pub use crate::store::{ListStore, RedisListStore};
    pub use crate::transport::{TransportConfig, TransportQueue};
}
