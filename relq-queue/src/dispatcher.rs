//! Dispatch loop: claims items from the transport and runs their handlers.

use futures::FutureExt;
use relq_log::{debug, error, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::envelope::{self, Envelope};
use crate::error::{QueueError, QueueResult};
use crate::handler::{AckPolicy, FnHandler, Handler, HandlerOutcome, HandlerRegistry, JsonHandler};
use crate::transport::{Claim, TransportQueue};

/// What happens to items that can never be handled: values without the
/// envelope marker, unknown type tags, and payloads a handler cannot decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectPolicy {
    /// Leave the item in the private list, where recovery will find it
    #[default]
    Orphan,
    /// Move the item to the dead-letter list
    DeadLetter,
}

impl RejectPolicy {
    /// Parse `orphan` or `dead-letter` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "orphan" => Some(Self::Orphan),
            "dead-letter" | "dead_letter" | "deadletter" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Maximum number of handlers running at once
    pub concurrency: usize,

    /// Blocking pop timeout; bounds how long cancellation can go unnoticed
    pub pop_timeout_secs: u64,

    /// Delay schedule after store failures
    pub backoff: Backoff,

    /// Handling of items that can never succeed
    pub reject_policy: RejectPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            pop_timeout_secs: 1,
            backoff: Backoff::default(),
            reject_policy: RejectPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    /// Default configuration with the given concurrency.
    pub fn new(concurrency: usize) -> Self {
        Self::default().with_concurrency(concurrency)
    }

    /// Load configuration from `RELQ_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Unparsable values are ignored and leave the default in place.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(concurrency) = lookup("RELQ_CONCURRENCY")
            && let Ok(n) = concurrency.trim().parse()
        {
            config = config.with_concurrency(n);
        }

        if let Some(timeout) = lookup("RELQ_POP_TIMEOUT")
            && let Ok(secs) = timeout.trim().parse()
        {
            config = config.with_pop_timeout(secs);
        }

        if let Some(policy) = lookup("RELQ_REJECT_POLICY")
            && let Some(policy) = RejectPolicy::parse(&policy)
        {
            config = config.with_reject_policy(policy);
        }

        config
    }

    /// Set the concurrency (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the pop timeout in seconds (at least 1, so the loop never blocks
    /// indefinitely).
    pub fn with_pop_timeout(mut self, secs: u64) -> Self {
        self.pop_timeout_secs = secs.max(1);
        self
    }

    /// Set the store failure backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the reject policy.
    pub fn with_reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.reject_policy = policy;
        self
    }
}

/// Where a dispatched item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Acknowledged,
    Orphaned,
    DeadLettered,
}

/// Claims items from a [`TransportQueue`] and hands each one to the handler
/// registered for its type tag, running at most `concurrency` handlers at
/// once.
///
/// Handler failure policy: an item whose handler returns false or panics is
/// not retried by the loop. It stays in the private list until a
/// [`TransportQueue::recover`] pass returns it to the shared list. Handlers
/// with [`AckPolicy::Always`] have their items acknowledged even on failure.
///
/// # Examples
///
/// ```no_run
/// use relq_queue::*;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> QueueResult<()> {
/// let store = Arc::new(MemoryListStore::new());
/// let transport = Arc::new(TransportQueue::new(store, TransportConfig::new("jobs"))?);
/// transport.recover(0).await?;
///
/// let dispatcher = Dispatcher::new(transport, 4);
/// dispatcher.register_fn("greet", |name: String| async move {
///     println!("hello {}", name);
///     true
/// })?;
/// dispatcher.push("greet", "world").await?;
///
/// let cancel = CancellationToken::new();
/// dispatcher.run(cancel).await;
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    transport: Arc<TransportQueue>,
    registry: Arc<HandlerRegistry>,
    gate: Arc<Semaphore>,
    config: DispatcherConfig,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with default settings and the given concurrency.
    pub fn new(transport: Arc<TransportQueue>, concurrency: usize) -> Self {
        Self::with_config(transport, DispatcherConfig::new(concurrency))
    }

    /// Create a dispatcher with custom configuration.
    pub fn with_config(transport: Arc<TransportQueue>, config: DispatcherConfig) -> Self {
        let concurrency = config.concurrency;
        let config = config.with_concurrency(concurrency);
        Self {
            transport,
            registry: Arc::new(HandlerRegistry::new()),
            gate: Arc::new(Semaphore::new(config.concurrency)),
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// The transport this dispatcher consumes from.
    pub fn transport(&self) -> &Arc<TransportQueue> {
        &self.transport
    }

    /// The configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Register a handler for `type_tag`, replacing any previous one.
    ///
    /// Safe to call while [`run`](Self::run) is active.
    pub fn register_handler<H: Handler>(
        &self,
        type_tag: impl Into<String>,
        handler: H,
    ) -> QueueResult<()> {
        self.registry.register(type_tag, handler)
    }

    /// Register an async closure over the raw payload string.
    pub fn register_fn<F, Fut>(&self, type_tag: impl Into<String>, f: F) -> QueueResult<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.registry.register(type_tag, FnHandler::new(f))
    }

    /// Register an async closure over a JSON-decoded payload.
    pub fn register_json<T, F, Fut>(&self, type_tag: impl Into<String>, f: F) -> QueueResult<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.registry.register(type_tag, JsonHandler::new(f))
    }

    /// Remove the handler for `type_tag`.
    pub fn unregister(&self, type_tag: &str) -> bool {
        self.registry.unregister(type_tag)
    }

    /// Enqueue `payload` under `type_tag`.
    pub async fn push(&self, type_tag: &str, payload: impl Display) -> QueueResult<()> {
        let raw = envelope::encode(type_tag, payload)?;
        self.transport.push(&raw).await
    }

    /// Enqueue `value` serialized as JSON under `type_tag`.
    pub async fn push_json<T: Serialize + ?Sized>(
        &self,
        type_tag: &str,
        value: &T,
    ) -> QueueResult<()> {
        let payload = serde_json::to_string(value)?;
        self.push(type_tag, payload).await
    }

    /// Number of handlers currently running.
    pub fn in_flight(&self) -> usize {
        self.config
            .concurrency
            .saturating_sub(self.gate.available_permits())
    }

    /// Free slots in the concurrency gate.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Wait until every running handler has finished.
    ///
    /// New claims made by a concurrent [`run`](Self::run) queue behind this
    /// call, so it returns at a moment when nothing was in flight.
    pub async fn wait_idle(&self) {
        let all = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        // Only fails if the semaphore is closed, which never happens.
        let _ = self.gate.acquire_many(all).await;
    }

    /// Run the dispatch loop until `cancel` fires.
    ///
    /// Cancellation is checked before each pop; handlers already running are
    /// not interrupted and are not waited for.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            queue = %self.transport.queue_key(),
            private_key = %self.transport.private_key(),
            concurrency = self.config.concurrency,
            "Dispatcher starting"
        );

        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let claim = match self.transport.pop(self.config.pop_timeout_secs).await {
                Ok(claim) => {
                    failures = 0;
                    claim
                }
                Err(e) if e.is_transient() => {
                    failures = 0;
                    continue;
                }
                Err(e) => {
                    let delay = self.config.backoff.delay_for_attempt(failures);
                    let delay_ms = delay.as_millis() as u64;
                    failures = failures.saturating_add(1);
                    if e.is_retryable() {
                        warn!(error = %e, attempt = failures, delay_ms, "Pop failed, backing off");
                    } else {
                        error!(
                            error = %e,
                            attempt = failures,
                            delay_ms,
                            "Unexpected pop failure, backing off"
                        );
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            if !envelope::is_envelope(&claim.value) {
                let reason = QueueError::InvalidEnvelope("missing marker".into());
                reject(&self.transport, self.config.reject_policy, &claim, &reason).await;
                continue;
            }

            let permit = match self.gate.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let transport = self.transport.clone();
            let registry = self.registry.clone();
            let reject_policy = self.config.reject_policy;

            debug!(dispatch_id = id, "Claimed item");

            tokio::spawn(async move {
                let _permit = permit;
                let disposition = dispatch(&transport, &registry, reject_policy, &claim).await;
                debug!(dispatch_id = id, disposition = ?disposition, "Dispatch finished");
            });
        }

        info!(queue = %self.transport.queue_key(), "Dispatcher stopped");
    }
}

/// Decode, look up, run, and settle one claimed item.
async fn dispatch(
    transport: &TransportQueue,
    registry: &HandlerRegistry,
    reject_policy: RejectPolicy,
    claim: &Claim,
) -> Disposition {
    let envelope = match Envelope::decode(&claim.value) {
        Ok(envelope) => envelope,
        Err(e) => return reject(transport, reject_policy, claim, &e).await,
    };

    let Some(handler) = registry.get(&envelope.type_tag) else {
        let reason = QueueError::NoHandler(envelope.type_tag.clone());
        return reject(transport, reject_policy, claim, &reason).await;
    };

    let outcome = AssertUnwindSafe(handler.call(&envelope.payload))
        .catch_unwind()
        .await;

    match outcome {
        Ok(HandlerOutcome::Succeeded) => acknowledge(transport, claim).await,
        Ok(HandlerOutcome::Failed) if handler.policy() == AckPolicy::Always => {
            acknowledge(transport, claim).await
        }
        Ok(HandlerOutcome::Failed) => {
            debug!(type_tag = %envelope.type_tag, "Handler reported failure, leaving item for recovery");
            Disposition::Orphaned
        }
        Ok(HandlerOutcome::Rejected(reason)) => {
            let reason = QueueError::Decode(reason);
            reject(transport, reject_policy, claim, &reason).await
        }
        Err(_) => {
            warn!(type_tag = %envelope.type_tag, "Handler panicked, leaving item for recovery");
            Disposition::Orphaned
        }
    }
}

async fn acknowledge(transport: &TransportQueue, claim: &Claim) -> Disposition {
    match transport.acknowledge_claim(claim).await {
        Ok(()) => Disposition::Acknowledged,
        Err(e) => {
            warn!(error = %e, "Failed to acknowledge item");
            Disposition::Orphaned
        }
    }
}

async fn reject(
    transport: &TransportQueue,
    policy: RejectPolicy,
    claim: &Claim,
    reason: &QueueError,
) -> Disposition {
    warn!(reason = %reason, policy = ?policy, "Rejecting item");

    match policy {
        RejectPolicy::Orphan => Disposition::Orphaned,
        RejectPolicy::DeadLetter => match transport.dead_letter(claim).await {
            Ok(true) => Disposition::DeadLettered,
            Ok(false) => Disposition::Orphaned,
            Err(e) => {
                warn!(error = %e, "Failed to dead-letter item");
                Disposition::Orphaned
            }
        },
    }
}
