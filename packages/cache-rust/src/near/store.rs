//! Bounded near-tier store with LRU eviction and per-entry expiration.
//!
//! A single-lock map plus an index-based intrusive LRU list: entries carry
//! unit weight, eviction order is least-recently-accessed with ties broken by
//! insertion order, and node slots are recycled through a free list to limit
//! allocation churn. Expired entries are dropped lazily on access and
//! reported through the eviction listener.
//!
//! Expiration combines an absolute deadline with a sliding idle window; the
//! earlier of the two wins, so sliding bumps can never extend an entry past
//! its absolute budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use heytom_core::ResolvedExpiration;
use parking_lot::Mutex;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The entry's deadline passed.
    Expired,
    /// The entry was pushed out by capacity pressure.
    Evicted,
    /// The entry was removed explicitly.
    Removed,
}

/// Callback observing entry removal.
///
/// Invoked after the store lock is released, so implementations may call
/// back into the store. Used to clean sidecar state tied to entries.
pub type EvictionListener = Arc<dyn Fn(&str, EvictionReason) + Send + Sync>;

#[derive(Debug)]
struct Node {
    key: String,
    value: Bytes,
    absolute_deadline: Option<Instant>,
    sliding: Option<Duration>,
    /// `last access + sliding`; `None` when no sliding window is set.
    idle_deadline: Option<Instant>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Node {
    fn deadline(&self) -> Option<Instant> {
        match (self.absolute_deadline, self.idle_deadline) {
            (Some(absolute), Some(idle)) => Some(absolute.min(idle)),
            (Some(absolute), None) => Some(absolute),
            (None, Some(idle)) => Some(idle),
            (None, None) => None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Bumps the idle window. The absolute deadline still caps the entry
    /// through `deadline()`.
    fn touch(&mut self, now: Instant) {
        if let Some(window) = self.sliding {
            self.idle_deadline = Some(now + window);
        }
    }
}

struct Inner {
    /// Key -> node index for O(1) lookup.
    map: HashMap<String, usize>,
    /// Dense node arena; LRU links are indices into it.
    nodes: Vec<Option<Node>>,
    /// Recycled slots.
    free: Vec<usize>,
    /// Least-recently-used end of the list.
    head: Option<usize>,
    /// Most-recently-used end of the list.
    tail: Option<usize>,
}

impl Inner {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn lru_unlink(&mut self, idx: usize) {
        let (prev, next) = match self.nodes[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = self.nodes[prev_idx].as_mut() {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next_idx) => {
                if let Some(next_node) = self.nodes[next_idx].as_mut() {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn lru_push_back(&mut self, idx: usize) {
        let tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = tail;
            node.next = None;
        }
        match tail {
            Some(tail_idx) => {
                if let Some(tail_node) = self.nodes[tail_idx].as_mut() {
                    tail_node.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn lru_touch(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.lru_unlink(idx);
        self.lru_push_back(idx);
    }

    fn insert_node(&mut self, node: Node) -> usize {
        let key = node.key.clone();
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.lru_push_back(idx);
        self.map.insert(key, idx);
        idx
    }

    /// Removes a node by index, returning its key and expiry state.
    fn remove_idx(&mut self, idx: usize, now: Instant) -> Option<(String, bool)> {
        self.lru_unlink(idx);
        let node = self.nodes[idx].take()?;
        self.map.remove(&node.key);
        self.free.push(idx);
        let is_expired = node.is_expired(now);
        Some((node.key, is_expired))
    }

    fn pop_lru(&mut self, now: Instant) -> Option<(String, bool)> {
        let idx = self.head?;
        self.remove_idx(idx, now)
    }
}

/// Bounded key-to-bytes map with LRU eviction and expiration.
///
/// Thread-safe; all operations are non-suspending.
pub struct NearStore {
    inner: Mutex<Inner>,
    max_size: usize,
    default_expiration: Duration,
    listener: Mutex<Option<EvictionListener>>,
}

impl NearStore {
    /// Creates a store bounded at `max_size` entries.
    ///
    /// `default_expiration` applies to writes that carry no expiration.
    #[must_use]
    pub fn new(max_size: usize, default_expiration: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            max_size: max_size.max(1),
            default_expiration,
            listener: Mutex::new(None),
        }
    }

    /// Installs the eviction listener. Replaces any previous one.
    pub fn set_eviction_listener(&self, listener: EvictionListener) {
        *self.listener.lock() = Some(listener);
    }

    /// Looks a key up, bumping LRU recency and the sliding window.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut dropped = Vec::new();
        let value = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let idx = *inner.map.get(key)?;

            let expired = inner.nodes[idx]
                .as_ref()
                .is_some_and(|node| node.is_expired(now));
            if expired {
                if let Some((key, _)) = inner.remove_idx(idx, now) {
                    dropped.push((key, EvictionReason::Expired));
                }
                None
            } else {
                let value = inner.nodes[idx].as_mut().map(|node| {
                    node.touch(now);
                    node.value.clone()
                });
                inner.lru_touch(idx);
                value
            }
        };
        self.notify(dropped);
        value
    }

    /// Inserts or replaces an entry.
    ///
    /// `None` expiration applies the configured default (absolute from now).
    /// Overwriting marks the entry most recently used and replaces its
    /// policy. Capacity overflow evicts from the least-recently-used end.
    pub fn set(&self, key: &str, value: Bytes, expiration: Option<ResolvedExpiration>) {
        let resolved =
            expiration.unwrap_or_else(|| ResolvedExpiration::absolute(self.default_expiration));
        let now = Instant::now();
        let absolute_deadline = resolved.absolute.map(|remaining| now + remaining);
        let idle_deadline = resolved.sliding.map(|window| now + window);

        let mut dropped = Vec::new();
        {
            let mut inner = self.inner.lock();
            if let Some(&idx) = inner.map.get(key) {
                if let Some(node) = inner.nodes[idx].as_mut() {
                    node.value = value;
                    node.absolute_deadline = absolute_deadline;
                    node.sliding = resolved.sliding;
                    node.idle_deadline = idle_deadline;
                }
                inner.lru_touch(idx);
            } else {
                inner.insert_node(Node {
                    key: key.to_string(),
                    value,
                    absolute_deadline,
                    sliding: resolved.sliding,
                    idle_deadline,
                    prev: None,
                    next: None,
                });
                while inner.map.len() > self.max_size {
                    match inner.pop_lru(now) {
                        Some((evicted, expired)) => {
                            let reason = if expired {
                                EvictionReason::Expired
                            } else {
                                EvictionReason::Evicted
                            };
                            dropped.push((evicted, reason));
                        }
                        None => break,
                    }
                }
            }
        }
        self.notify(dropped);
    }

    /// Removes a key. Returns whether a live entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut dropped = Vec::new();
        let removed_live = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            match inner.map.get(key).copied() {
                Some(idx) => match inner.remove_idx(idx, now) {
                    Some((key, expired)) => {
                        let reason = if expired {
                            EvictionReason::Expired
                        } else {
                            EvictionReason::Removed
                        };
                        dropped.push((key, reason));
                        !expired
                    }
                    None => false,
                },
                None => false,
            }
        };
        self.notify(dropped);
        removed_live
    }

    /// Bumps the sliding window without reading the value.
    /// Returns false when the key is missing or already expired.
    pub fn refresh(&self, key: &str) -> bool {
        let mut dropped = Vec::new();
        let refreshed = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            match inner.map.get(key).copied() {
                Some(idx) => {
                    let expired = inner.nodes[idx]
                        .as_ref()
                        .is_some_and(|node| node.is_expired(now));
                    if expired {
                        if let Some((key, _)) = inner.remove_idx(idx, now) {
                            dropped.push((key, EvictionReason::Expired));
                        }
                        false
                    } else {
                        if let Some(node) = inner.nodes[idx].as_mut() {
                            node.touch(now);
                        }
                        inner.lru_touch(idx);
                        true
                    }
                }
                None => false,
            }
        };
        self.notify(dropped);
        refreshed
    }

    /// Drops every entry without notifying the listener.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }

    /// Number of entries, counting lazily-expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists, without bumping recency or sliding.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner
            .map
            .get(key)
            .and_then(|&idx| inner.nodes[idx].as_ref())
            .is_some_and(|node| !node.is_expired(now))
    }

    fn notify(&self, dropped: Vec<(String, EvictionReason)>) {
        if dropped.is_empty() {
            return;
        }
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            for (key, reason) in dropped {
                listener(&key, reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex as PlMutex;

    use super::*;

    fn bytes(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    fn store() -> NearStore {
        NearStore::new(16, Duration::from_secs(300))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn sleep(n: u64) {
        std::thread::sleep(ms(n));
    }

    #[test]
    fn set_get_round_trip() {
        let store = store();
        store.set("alpha", bytes(b"value"), None);
        assert_eq!(store.get("alpha"), Some(bytes(b"value")));
    }

    #[test]
    fn missing_keys_return_none() {
        let store = store();
        assert_eq!(store.get("never-set"), None);
    }

    #[test]
    fn remove_is_terminal_until_next_set() {
        let store = store();
        store.set("alpha", bytes(b"1"), None);
        assert!(store.remove("alpha"));
        assert_eq!(store.get("alpha"), None);
        assert!(!store.remove("alpha"));

        store.set("alpha", bytes(b"2"), None);
        assert_eq!(store.get("alpha"), Some(bytes(b"2")));
    }

    #[test]
    fn default_expiration_applies_when_none_given() {
        let store = NearStore::new(16, ms(20));
        store.set("alpha", bytes(b"v"), None);
        assert!(store.get("alpha").is_some());

        sleep(35);
        assert_eq!(store.get("alpha"), None);
    }

    #[test]
    fn absolute_expiration_hides_entries() {
        let store = store();
        store.set("alpha", bytes(b"v"), Some(ResolvedExpiration::absolute(ms(20))));
        assert!(store.get("alpha").is_some());

        sleep(35);
        assert_eq!(store.get("alpha"), None);
    }

    #[test]
    fn sliding_access_extends_life() {
        let store = store();
        let expiration = ResolvedExpiration {
            absolute: None,
            sliding: Some(ms(60)),
        };
        store.set("alpha", bytes(b"v"), Some(expiration));

        // Two accesses inside the window keep the entry alive past the
        // original deadline.
        sleep(35);
        assert!(store.get("alpha").is_some());
        sleep(35);
        assert!(store.get("alpha").is_some());

        sleep(80);
        assert_eq!(store.get("alpha"), None);
    }

    #[test]
    fn sliding_bump_never_outlives_absolute_budget() {
        let store = store();
        let expiration = ResolvedExpiration {
            absolute: Some(ms(50)),
            sliding: Some(ms(40)),
        };
        store.set("alpha", bytes(b"v"), Some(expiration));

        sleep(30);
        assert!(store.get("alpha").is_some());
        // The access bumped the idle window, but the absolute deadline wins.
        sleep(30);
        assert_eq!(store.get("alpha"), None);
    }

    #[test]
    fn earlier_sliding_deadline_wins_over_absolute() {
        let store = store();
        let expiration = ResolvedExpiration {
            absolute: Some(Duration::from_secs(10)),
            sliding: Some(ms(20)),
        };
        store.set("alpha", bytes(b"v"), Some(expiration));

        sleep(35);
        assert_eq!(store.get("alpha"), None);
    }

    #[test]
    fn refresh_bumps_the_sliding_window() {
        let store = store();
        let expiration = ResolvedExpiration {
            absolute: None,
            sliding: Some(ms(60)),
        };
        store.set("alpha", bytes(b"v"), Some(expiration));

        sleep(35);
        assert!(store.refresh("alpha"));
        sleep(35);
        assert!(store.get("alpha").is_some());
    }

    #[test]
    fn refresh_reports_missing_and_expired_entries() {
        let store = store();
        assert!(!store.refresh("missing"));

        store.set("alpha", bytes(b"v"), Some(ResolvedExpiration::absolute(ms(10))));
        sleep(20);
        assert!(!store.refresh("alpha"));
    }

    #[test]
    fn evicts_least_recently_accessed_first() {
        let store = NearStore::new(2, Duration::from_secs(300));
        store.set("a", bytes(b"1"), None);
        store.set("b", bytes(b"2"), None);
        // Touch `a` so `b` becomes the eviction candidate.
        assert!(store.get("a").is_some());

        store.set("c", bytes(b"3"), None);
        assert_eq!(store.get("b"), None);
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn eviction_ties_break_by_insertion_order() {
        let store = NearStore::new(2, Duration::from_secs(300));
        store.set("a", bytes(b"1"), None);
        store.set("b", bytes(b"2"), None);

        store.set("c", bytes(b"3"), None);
        assert_eq!(store.get("a"), None);
        assert!(store.get("b").is_some());
    }

    #[test]
    fn contains_key_does_not_bump_recency() {
        let store = NearStore::new(2, Duration::from_secs(300));
        store.set("a", bytes(b"1"), None);
        store.set("b", bytes(b"2"), None);
        assert!(store.contains_key("a"));

        // `a` is still the least recently *accessed* entry.
        store.set("c", bytes(b"3"), None);
        assert!(!store.contains_key("a"));
        assert!(store.contains_key("b"));
    }

    #[test]
    fn size_never_exceeds_the_bound() {
        let store = NearStore::new(10, Duration::from_secs(300));
        for i in 0..100 {
            store.set(&format!("key{i}"), bytes(b"v"), None);
            assert!(store.len() <= 10);
        }
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn overwrite_marks_entry_most_recently_used() {
        let store = NearStore::new(2, Duration::from_secs(300));
        store.set("a", bytes(b"1"), None);
        store.set("b", bytes(b"2"), None);
        store.set("a", bytes(b"1b"), None);

        store.set("c", bytes(b"3"), None);
        assert_eq!(store.get("b"), None);
        assert_eq!(store.get("a"), Some(bytes(b"1b")));
    }

    #[test]
    fn listener_sees_removal_reasons() {
        let store = NearStore::new(2, Duration::from_secs(300));
        let seen = Arc::new(PlMutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        store.set_eviction_listener(Arc::new(move |key, reason| {
            sink.lock().push((key.to_string(), reason));
        }));

        store.set("a", bytes(b"1"), None);
        store.remove("a");

        store.set("b", bytes(b"2"), None);
        store.set("c", bytes(b"3"), None);
        store.set("d", bytes(b"4"), None);

        store.set("e", bytes(b"5"), Some(ResolvedExpiration::absolute(ms(10))));
        sleep(20);
        assert_eq!(store.get("e"), None);

        let seen = seen.lock();
        assert!(seen.contains(&("a".to_string(), EvictionReason::Removed)));
        assert!(seen.contains(&("b".to_string(), EvictionReason::Evicted)));
        assert!(seen.contains(&("e".to_string(), EvictionReason::Expired)));
    }

    #[test]
    fn listener_may_reenter_the_store() {
        let store = Arc::new(NearStore::new(16, Duration::from_secs(300)));
        let calls = Arc::new(AtomicUsize::new(0));

        let reentrant = Arc::clone(&store);
        let counted = Arc::clone(&calls);
        store.set_eviction_listener(Arc::new(move |_, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            // Runs outside the store lock, so this must not deadlock.
            let _ = reentrant.len();
        }));

        store.set("a", bytes(b"1"), None);
        store.remove("a");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = store();
        store.set("a", bytes(b"1"), None);
        store.set("b", bytes(b"2"), None);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.get("a"), None);
    }
}
