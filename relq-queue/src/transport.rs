//! Reliable transport over a shared list and a per-instance private list.
//!
//! Producers push onto the head of the shared list. A consumer claims work
//! by atomically moving the tail of the shared list onto the head of its
//! private list `<queue>:@<created-unix-ts>`, and acknowledges by removing
//! it from there. Anything left in a private list after its consumer died
//! is moved back to the shared list by [`TransportQueue::recover`].

use chrono::Utc;
use relq_log::{debug, info, warn};
use std::sync::Arc;

use crate::error::{QueueError, QueueResult};
use crate::store::ListStore;

/// Separator between the queue name and the creation timestamp in a
/// private list key.
pub const PRIVATE_SEPARATOR: &str = ":@";

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Shared list key (the queue identifier)
    pub queue_name: String,

    /// Keys examined per scan step during recovery
    pub scan_count: usize,

    /// Suffix appended to the queue name for the dead-letter list
    pub dead_letter_suffix: String,
}

impl TransportConfig {
    /// Create a configuration for the named queue.
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            scan_count: 100,
            dead_letter_suffix: ":dead".to_string(),
        }
    }

    /// Set the scan page size.
    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    /// Set the dead-letter suffix.
    pub fn with_dead_letter_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dead_letter_suffix = suffix.into();
        self
    }

    /// Reject names that cannot be told apart from private keys.
    pub fn validate(&self) -> QueueResult<()> {
        if self.queue_name.is_empty() {
            return Err(QueueError::Config("queue name must not be empty".into()));
        }
        if self.queue_name.contains(PRIVATE_SEPARATOR) {
            return Err(QueueError::Config(format!(
                "queue name {:?} must not contain {:?}",
                self.queue_name, PRIVATE_SEPARATOR
            )));
        }
        if self.dead_letter_suffix.is_empty() || self.dead_letter_suffix.contains(PRIVATE_SEPARATOR)
        {
            return Err(QueueError::Config(format!(
                "invalid dead-letter suffix {:?}",
                self.dead_letter_suffix
            )));
        }
        Ok(())
    }
}

/// A value claimed into the private list and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// The raw value as stored
    pub value: String,
}

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Keys returned by the scan
    pub keys_scanned: usize,
    /// Private lists old enough to be drained
    pub lists_drained: usize,
    /// Items moved back to the shared list
    pub items_moved: usize,
    /// Private lists younger than the minimum age
    pub skipped_young: usize,
    /// Keys whose timestamp suffix did not parse
    pub skipped_malformed: usize,
    /// Private lists of other queues sharing this name as a prefix
    pub skipped_foreign: usize,
}

/// List lengths for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items waiting in the shared list
    pub pending: usize,
    /// Items claimed by this instance and not yet acknowledged
    pub in_flight: usize,
    /// Items in the dead-letter list
    pub dead_letter: usize,
}

/// Reliable queue transport bound to one shared and one private list.
pub struct TransportQueue {
    store: Arc<dyn ListStore>,
    config: TransportConfig,
    private_key: String,
    dead_letter_key: String,
    created_at: i64,
}

impl TransportQueue {
    /// Create a transport whose private list is stamped with the current time.
    pub fn new(store: Arc<dyn ListStore>, config: TransportConfig) -> QueueResult<Self> {
        Self::with_created_at(store, config, Utc::now().timestamp())
    }

    /// Create a transport with an explicit creation timestamp (unix seconds).
    pub fn with_created_at(
        store: Arc<dyn ListStore>,
        config: TransportConfig,
        created_at: i64,
    ) -> QueueResult<Self> {
        config.validate()?;

        let private_key = format!("{}{}{}", config.queue_name, PRIVATE_SEPARATOR, created_at);
        let dead_letter_key = format!("{}{}", config.queue_name, config.dead_letter_suffix);

        info!(
            queue = %config.queue_name,
            private_key = %private_key,
            "Transport queue ready"
        );

        Ok(Self {
            store,
            config,
            private_key,
            dead_letter_key,
            created_at,
        })
    }

    /// Shared list key.
    pub fn queue_key(&self) -> &str {
        &self.config.queue_name
    }

    /// This instance's private list key.
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Dead-letter list key.
    pub fn dead_letter_key(&self) -> &str {
        &self.dead_letter_key
    }

    /// Creation timestamp embedded in the private key.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// The configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Push a value onto the head of the shared list.
    pub async fn push(&self, value: &str) -> QueueResult<()> {
        self.store.push_head(self.queue_key(), value).await
    }

    /// Claim the oldest value, waiting up to `timeout_secs` (0 waits forever).
    ///
    /// Returns [`QueueError::NoData`] when the wait elapses.
    pub async fn pop(&self, timeout_secs: u64) -> QueueResult<Claim> {
        self.store
            .blocking_move_tail_to_head(self.queue_key(), &self.private_key, timeout_secs)
            .await?
            .map(|value| Claim { value })
            .ok_or(QueueError::NoData)
    }

    /// Remove the tail element of the private list, whichever it is.
    ///
    /// Only correct when a single claim is in flight; concurrent consumers
    /// should use [`acknowledge_claim`](Self::acknowledge_claim).
    pub async fn acknowledge(&self) -> QueueResult<()> {
        match self.store.pop_tail(&self.private_key).await? {
            Some(_) => Ok(()),
            None => Err(QueueError::EmptyList(self.private_key.clone())),
        }
    }

    /// Remove exactly the claimed value from the private list.
    pub async fn acknowledge_claim(&self, claim: &Claim) -> QueueResult<()> {
        match self.store.remove_value(&self.private_key, &claim.value).await? {
            0 => Err(QueueError::EmptyList(self.private_key.clone())),
            _ => Ok(()),
        }
    }

    /// Move the claimed value from the private list to the dead-letter list.
    ///
    /// Returns false when the value was no longer in the private list.
    pub async fn dead_letter(&self, claim: &Claim) -> QueueResult<bool> {
        let moved = self
            .store
            .move_value(&self.private_key, &self.dead_letter_key, &claim.value)
            .await?;
        if moved {
            warn!(
                queue = %self.config.queue_name,
                dead_letter_key = %self.dead_letter_key,
                "Moved item to dead letter list"
            );
        }
        Ok(moved)
    }

    /// Return orphaned items from private lists to the shared list.
    ///
    /// Every private list of this queue whose age is at least `min_age_secs`
    /// is drained (all of them when `min_age_secs` is 0). Younger lists may
    /// belong to a live consumer and are left alone. Safe to repeat.
    pub async fn recover(&self, min_age_secs: u64) -> QueueResult<RecoveryReport> {
        let pattern = format!("{}*{}*", self.config.queue_name, PRIVATE_SEPARATOR);
        let now = Utc::now().timestamp();
        let mut report = RecoveryReport::default();
        let mut cursor = 0;

        loop {
            let (next, keys) = self
                .store
                .scan(cursor, &pattern, self.config.scan_count)
                .await?;

            for key in keys {
                report.keys_scanned += 1;
                self.reclaim(&key, now, min_age_secs, &mut report).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        info!(
            queue = %self.config.queue_name,
            keys_scanned = report.keys_scanned,
            lists_drained = report.lists_drained,
            items_moved = report.items_moved,
            skipped_young = report.skipped_young,
            "Recovery pass finished"
        );

        Ok(report)
    }

    async fn reclaim(
        &self,
        key: &str,
        now: i64,
        min_age_secs: u64,
        report: &mut RecoveryReport,
    ) -> QueueResult<()> {
        let Some((owner, timestamp)) = parse_private_key(key) else {
            debug!(key = %key, "Skipping key with malformed timestamp suffix");
            report.skipped_malformed += 1;
            return Ok(());
        };

        if owner != self.config.queue_name {
            report.skipped_foreign += 1;
            return Ok(());
        }

        let age = now.saturating_sub(timestamp);
        if min_age_secs > 0 && age < min_age_secs as i64 {
            debug!(key = %key, age, "Private list too young to recover");
            report.skipped_young += 1;
            return Ok(());
        }

        let mut moved = 0;
        while self
            .store
            .move_tail_to_head(key, self.queue_key())
            .await?
            .is_some()
        {
            moved += 1;
        }

        debug!(key = %key, moved, "Drained private list");
        report.lists_drained += 1;
        report.items_moved += moved;
        Ok(())
    }

    /// Current list lengths.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            pending: self.store.len(self.queue_key()).await?,
            in_flight: self.store.len(&self.private_key).await?,
            dead_letter: self.store.len(&self.dead_letter_key).await?,
        })
    }
}

/// Split `<owner>:@<timestamp>` into its parts.
pub fn parse_private_key(key: &str) -> Option<(&str, i64)> {
    let (owner, suffix) = key.rsplit_once(PRIVATE_SEPARATOR)?;
    let timestamp = suffix.parse().ok()?;
    Some((owner, timestamp))
}
