//! Error types for queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] relq_redis::RedisError),

    /// The list store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A blocking pop timed out with nothing to claim
    #[error("No data available")]
    NoData,

    /// Acknowledge found nothing to remove
    #[error("List is empty: {0}")]
    EmptyList(String),

    /// Popped value is not a `tag#|payload` envelope
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Type tag is empty or contains the envelope marker
    #[error("Invalid type tag: {0:?}")]
    InvalidTypeTag(String),

    /// No handler registered for the type tag
    #[error("No handler registered for type: {0}")]
    NoHandler(String),

    /// Handler could not decode its payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("Queue error: {0}")]
    Other(String),
}

impl QueueError {
    /// Expected idle states of the dispatch loop, not failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoData | Self::EmptyList(_))
    }

    /// Connectivity failures worth retrying after a delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Redis(e) => e.is_retryable(),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
