//! In-process list store for tests and single-process deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{QueueError, QueueResult};
use crate::store::ListStore;

/// Resumable scans kept at once; the oldest abandoned one is dropped first.
const MAX_OPEN_SCANS: usize = 64;

/// [`ListStore`] holding lists in memory with Redis list semantics.
///
/// Lists are deleted when their last element is removed, so key scans only
/// ever see non-empty lists, as with Redis. Scans walk key names in sorted
/// order and resume after the last name examined, so a key present for the
/// whole scan is returned exactly once even if other keys come and go.
#[derive(Default)]
pub struct MemoryListStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
    unavailable: AtomicBool,
    scans: Mutex<HashMap<u64, String>>,
    last_cursor: AtomicU64,
}

impl MemoryListStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection to the store. While
    /// unavailable every operation fails with [`QueueError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Snapshot of a list, head first.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.lists
            .lock()
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All key names currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lists.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    fn push_locked(lists: &mut HashMap<String, VecDeque<String>>, list: &str, value: String) {
        lists.entry(list.to_string()).or_default().push_front(value);
    }

    fn pop_locked(lists: &mut HashMap<String, VecDeque<String>>, list: &str) -> Option<String> {
        let queue = lists.get_mut(list)?;
        let value = queue.pop_back();
        if queue.is_empty() {
            lists.remove(list);
        }
        value
    }

    fn remove_locked(
        lists: &mut HashMap<String, VecDeque<String>>,
        list: &str,
        value: &str,
    ) -> bool {
        let Some(queue) = lists.get_mut(list) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|v| v == value) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            lists.remove(list);
        }
        true
    }

    fn try_move(&self, source: &str, destination: &str) -> Option<String> {
        let mut lists = self.lists.lock();
        let value = Self::pop_locked(&mut lists, source)?;
        Self::push_locked(&mut lists, destination, value.clone());
        drop(lists);
        self.pushed.notify_waiters();
        Some(value)
    }
}

/// Translate a Redis glob (`*`, `?`, `\` escapes) into an anchored regex.
fn glob_to_regex(pattern: &str) -> QueueResult<Regex> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| QueueError::Other(format!("bad scan pattern: {}", e)))
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push_head(&self, list: &str, value: &str) -> QueueResult<()> {
        self.check()?;
        Self::push_locked(&mut self.lists.lock(), list, value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_tail(&self, list: &str) -> QueueResult<Option<String>> {
        self.check()?;
        Ok(Self::pop_locked(&mut self.lists.lock(), list))
    }

    async fn move_tail_to_head(
        &self,
        source: &str,
        destination: &str,
    ) -> QueueResult<Option<String>> {
        self.check()?;
        Ok(self.try_move(source, destination))
    }

    async fn blocking_move_tail_to_head(
        &self,
        source: &str,
        destination: &str,
        timeout_secs: u64,
    ) -> QueueResult<Option<String>> {
        self.check()?;
        let deadline = (timeout_secs > 0)
            .then(|| tokio::time::Instant::now() + Duration::from_secs(timeout_secs));

        loop {
            // Register before checking so a push in between is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_move(source, destination) {
                return Ok(Some(value));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
            self.check()?;
        }
    }

    async fn remove_value(&self, list: &str, value: &str) -> QueueResult<usize> {
        self.check()?;
        Ok(Self::remove_locked(&mut self.lists.lock(), list, value) as usize)
    }

    async fn move_value(
        &self,
        source: &str,
        destination: &str,
        value: &str,
    ) -> QueueResult<bool> {
        self.check()?;
        let mut lists = self.lists.lock();
        if !Self::remove_locked(&mut lists, source, value) {
            return Ok(false);
        }
        Self::push_locked(&mut lists, destination, value.to_string());
        drop(lists);
        self.pushed.notify_waiters();
        Ok(true)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> QueueResult<(u64, Vec<String>)> {
        self.check()?;
        let matcher = glob_to_regex(pattern)?;

        let resume_after = match cursor {
            0 => None,
            c => Some(
                self.scans
                    .lock()
                    .remove(&c)
                    .ok_or_else(|| QueueError::Other(format!("unknown scan cursor {}", c)))?,
            ),
        };

        let keys = self.keys();
        let remaining: Vec<&String> = keys
            .iter()
            .filter(|k| resume_after.as_ref().is_none_or(|after| *k > after))
            .collect();
        let page = &remaining[..count.max(1).min(remaining.len())];

        let matched = page
            .iter()
            .filter(|k| matcher.is_match(k))
            .map(|k| (*k).clone())
            .collect();

        let next = match page.last() {
            Some(last) if page.len() < remaining.len() => {
                let id = self.last_cursor.fetch_add(1, Ordering::SeqCst) + 1;
                let mut scans = self.scans.lock();
                while scans.len() >= MAX_OPEN_SCANS {
                    match scans.keys().min().copied() {
                        Some(oldest) => scans.remove(&oldest),
                        None => break,
                    };
                }
                scans.insert(id, (*last).clone());
                id
            }
            _ => 0,
        };

        Ok((next, matched))
    }

    async fn len(&self, list: &str) -> QueueResult<usize> {
        self.check()?;
        Ok(self.lists.lock().get(list).map(VecDeque::len).unwrap_or(0))
    }

    async fn range(&self, list: &str) -> QueueResult<Vec<String>> {
        self.check()?;
        Ok(self.list(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_head_push_tail_pop_is_fifo() {
        let store = MemoryListStore::new();
        for v in ["p1", "p2", "p3"] {
            store.push_head("q", v).await.unwrap();
        }
        assert_eq!(store.list("q"), vec!["p3", "p2", "p1"]);
        assert_eq!(store.pop_tail("q").await.unwrap().as_deref(), Some("p1"));
        assert_eq!(store.pop_tail("q").await.unwrap().as_deref(), Some("p2"));
        assert_eq!(store.pop_tail("q").await.unwrap().as_deref(), Some("p3"));
        assert_eq!(store.pop_tail("q").await.unwrap(), None);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_move_tail_to_head() {
        let store = MemoryListStore::new();
        store.push_head("src", "a").await.unwrap();
        store.push_head("src", "b").await.unwrap();

        let moved = store.move_tail_to_head("src", "dst").await.unwrap();
        assert_eq!(moved.as_deref(), Some("a"));
        assert_eq!(store.list("src"), vec!["b"]);
        assert_eq!(store.list("dst"), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_move_times_out() {
        let store = MemoryListStore::new();
        let moved = store
            .blocking_move_tail_to_head("src", "dst", 1)
            .await
            .unwrap();
        assert_eq!(moved, None);
    }

    #[tokio::test]
    async fn test_blocking_move_wakes_on_push() {
        let store = Arc::new(MemoryListStore::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.blocking_move_tail_to_head("src", "dst", 5).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_head("src", "late").await.unwrap();

        let moved = waiter.await.unwrap().unwrap();
        assert_eq!(moved.as_deref(), Some("late"));
        assert_eq!(store.list("dst"), vec!["late"]);
    }

    #[tokio::test]
    async fn test_remove_and_move_value() {
        let store = MemoryListStore::new();
        for v in ["x", "y", "x"] {
            store.push_head("l", v).await.unwrap();
        }

        assert_eq!(store.remove_value("l", "x").await.unwrap(), 1);
        assert_eq!(store.list("l"), vec!["y", "x"]);
        assert_eq!(store.remove_value("l", "missing").await.unwrap(), 0);

        assert!(store.move_value("l", "dead", "y").await.unwrap());
        assert!(!store.move_value("l", "dead", "y").await.unwrap());
        assert_eq!(store.list("dead"), vec!["y"]);
        assert_eq!(store.list("l"), vec!["x"]);
    }

    #[tokio::test]
    async fn test_scan_pages_through_all_keys() {
        let store = MemoryListStore::new();
        for key in ["a", "jobs:@1", "b", "c", "jobs:@2", "d", "jobs"] {
            store.push_head(key, "v").await.unwrap();
        }

        let mut cursor = 0;
        let mut found = Vec::new();
        let mut empty_pages = 0;
        loop {
            let (next, keys) = store.scan(cursor, "jobs*:@*", 2).await.unwrap();
            if keys.is_empty() {
                empty_pages += 1;
            }
            found.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        found.sort();
        assert_eq!(found, vec!["jobs:@1", "jobs:@2"]);
        assert!(empty_pages > 0);
    }

    #[tokio::test]
    async fn test_abandoned_scans_are_bounded() {
        let store = MemoryListStore::new();
        for i in 0..4 {
            store.push_head(&format!("k{}", i), "v").await.unwrap();
        }

        let mut cursors = Vec::new();
        for _ in 0..MAX_OPEN_SCANS + 10 {
            let (next, _) = store.scan(0, "*", 1).await.unwrap();
            assert_ne!(next, 0);
            cursors.push(next);
        }
        assert_eq!(store.scans.lock().len(), MAX_OPEN_SCANS);

        // The oldest cursors were dropped; the newest still resume.
        assert!(store.scan(cursors[0], "*", 1).await.is_err());
        let newest = *cursors.last().unwrap();
        let (_, keys) = store.scan(newest, "*", 10).await.unwrap();
        assert_eq!(keys, vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("jobs*:@*").unwrap();
        assert!(re.is_match("jobs:@123"));
        assert!(re.is_match("jobs-eu:@1"));
        assert!(!re.is_match("jobs"));
        assert!(!re.is_match("xjobs:@1"));

        let re = glob_to_regex("a?c.d").unwrap();
        assert!(re.is_match("abc.d"));
        assert!(!re.is_match("abcxd"));

        let re = glob_to_regex(r"lit\*").unwrap();
        assert!(re.is_match("lit*"));
        assert!(!re.is_match("literal"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryListStore::new();
        store.set_available(false);
        assert!(matches!(
            store.push_head("q", "v").await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(store.len("q").await.is_err());

        store.set_available(true);
        store.push_head("q", "v").await.unwrap();
        assert_eq!(store.len("q").await.unwrap(), 1);
    }
}
