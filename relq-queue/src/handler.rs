//! Typed handlers and the tag-keyed handler registry.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::envelope::validate_type_tag;
use crate::error::{QueueError, QueueResult};

/// When a handled item is removed from the private list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Acknowledge only when the handler reports success
    #[default]
    OnSuccess,
    /// Acknowledge after every completed attempt, even a failed one
    Always,
}

/// Result of running a handler on one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Handler returned true
    Succeeded,
    /// Handler returned false
    Failed,
    /// Payload could not be decoded for this handler
    Rejected(String),
}

/// Processing logic for one type tag.
///
/// A handler decodes the raw payload into its own type, processes it, and
/// chooses how its items are acknowledged.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use relq_queue::{Handler, QueueError, QueueResult};
///
/// struct Resize;
///
/// #[async_trait]
/// impl Handler for Resize {
///     type Payload = u32;
///
///     fn decode(&self, payload: &str) -> QueueResult<u32> {
///         payload.parse().map_err(|_| QueueError::Decode(payload.to_string()))
///     }
///
///     async fn handle(&self, width: u32) -> bool {
///         width <= 4096
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Decoded payload type.
    type Payload: Send + 'static;

    /// Turn the raw payload text into [`Self::Payload`].
    fn decode(&self, payload: &str) -> QueueResult<Self::Payload>;

    /// Process one payload; true means done and safe to acknowledge.
    async fn handle(&self, payload: Self::Payload) -> bool;

    /// Acknowledgement policy for this handler's items.
    fn ack_policy(&self) -> AckPolicy {
        AckPolicy::OnSuccess
    }
}

/// Object-safe form of [`Handler`] stored in the registry.
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    /// Decode and handle a raw payload.
    async fn call(&self, payload: &str) -> HandlerOutcome;

    /// The handler's acknowledgement policy.
    fn policy(&self) -> AckPolicy;
}

#[async_trait]
impl<H: Handler> ErasedHandler for H {
    async fn call(&self, payload: &str) -> HandlerOutcome {
        match self.decode(payload) {
            Ok(decoded) => {
                if self.handle(decoded).await {
                    HandlerOutcome::Succeeded
                } else {
                    HandlerOutcome::Failed
                }
            }
            Err(e) => HandlerOutcome::Rejected(e.to_string()),
        }
    }

    fn policy(&self) -> AckPolicy {
        self.ack_policy()
    }
}

/// Handler over the raw payload string, built from an async closure.
pub struct FnHandler<F, Fut> {
    f: F,
    ack_policy: AckPolicy,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            ack_policy: AckPolicy::OnSuccess,
            _future: PhantomData,
        }
    }

    /// Override the acknowledgement policy.
    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    type Payload = String;

    fn decode(&self, payload: &str) -> QueueResult<String> {
        Ok(payload.to_string())
    }

    async fn handle(&self, payload: String) -> bool {
        (self.f)(payload).await
    }

    fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }
}

/// Handler for JSON payloads decoded into `T`.
pub struct JsonHandler<T, F, Fut> {
    f: F,
    _types: PhantomData<fn() -> (T, Fut)>,
}

impl<T, F, Fut> JsonHandler<T, F, Fut>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    /// Wrap a closure taking the decoded value.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> Handler for JsonHandler<T, F, Fut>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    type Payload = T;

    fn decode(&self, payload: &str) -> QueueResult<T> {
        serde_json::from_str(payload).map_err(|e| QueueError::Decode(e.to_string()))
    }

    async fn handle(&self, payload: T) -> bool {
        (self.f)(payload).await
    }
}

/// Thread-safe map from type tag to handler.
///
/// Registration may happen at any time, including while a dispatcher is
/// reading from the registry; the last registration for a tag wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ErasedHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `type_tag`, replacing any previous one.
    pub fn register<H: Handler>(&self, type_tag: impl Into<String>, handler: H) -> QueueResult<()> {
        self.register_erased(type_tag, Arc::new(handler))
    }

    /// Register an already type-erased handler.
    pub fn register_erased(
        &self,
        type_tag: impl Into<String>,
        handler: Arc<dyn ErasedHandler>,
    ) -> QueueResult<()> {
        let type_tag = type_tag.into();
        validate_type_tag(&type_tag)?;
        self.handlers.write().insert(type_tag, handler);
        Ok(())
    }

    /// Remove the handler for `type_tag`; true if one was registered.
    pub fn unregister(&self, type_tag: &str) -> bool {
        self.handlers.write().remove(type_tag).is_some()
    }

    /// Look up the handler for `type_tag`.
    pub fn get(&self, type_tag: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers.read().get(type_tag).cloned()
    }

    /// Whether a handler is registered for `type_tag`.
    pub fn contains(&self, type_tag: &str) -> bool {
        self.handlers.read().contains_key(type_tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
