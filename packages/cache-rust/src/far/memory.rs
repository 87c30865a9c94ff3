//! In-memory [`FarStore`] implementation.
//!
//! A single-process stand-in for the shared remote tier, used by tests and
//! local development. Semantics match the production store: server-side TTL
//! on string entries, FIFO lists, score-ordered sorted sets, fan-out pub/sub,
//! and atomic lock primitives. Two cache instances sharing one
//! `MemoryFarStore` model two processes sharing a server.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use super::{FarResult, FarStore, FarStoreError, MessageHandler, Subscription};

/// Broadcast buffer per channel; laggy subscribers drop the oldest messages,
/// which is within the best-effort delivery contract.
const CHANNEL_CAPACITY: usize = 128;

/// A string entry with an optional server-side deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, Bytes>>,
    lists: HashMap<String, VecDeque<Bytes>>,
    sets: HashMap<String, HashSet<Bytes>>,
    // Insertion-ordered (member, score) pairs; sorted on range queries.
    zsets: HashMap<String, Vec<(Bytes, f64)>>,
    channels: HashMap<String, broadcast::Sender<Bytes>>,
}

impl Inner {
    /// Fetches a live string entry, dropping it when expired.
    fn live_string(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        if let Some(entry) = self.strings.get(key) {
            if entry.is_expired(now) {
                self.strings.remove(key);
                return None;
            }
        }
        self.strings.get(key)
    }
}

/// In-memory far store with fan-out pub/sub and TTL support.
pub struct MemoryFarStore {
    inner: Mutex<Inner>,
    /// When set, every operation fails with a connection error. Lets tests
    /// and local development exercise the degradation paths.
    unavailable: AtomicBool,
}

impl MemoryFarStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulates losing (or regaining) the connection to the far tier.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn guard(&self) -> FarResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(FarStoreError::Connection(
                "memory far store marked unavailable".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryFarStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FarStore for MemoryFarStore {
    async fn get(&self, key: &str) -> FarResult<Option<Bytes>> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        Ok(inner.live_string(key, now).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> FarResult<()> {
        self.guard()?;
        let mut inner = self.inner.lock();
        inner.strings.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> FarResult<u64> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            let live = inner.live_string(key, now).is_some();
            if live && inner.strings.remove(key).is_some() {
                removed += 1;
            }
            if inner.hashes.remove(key).is_some()
                || inner.lists.remove(key).is_some()
                || inner.sets.remove(key).is_some()
                || inner.zsets.remove(key).is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if inner.live_string(key, now).is_none() {
            return Ok(false);
        }
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(true)
    }

    async fn hash_set(&self, key: &str, field: &str, value: Bytes) -> FarResult<()> {
        self.guard()?;
        let mut inner = self.inner.lock();
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> FarResult<Option<Bytes>> {
        self.guard()?;
        let inner = self.inner.lock();
        Ok(inner
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hash_get_all(&self, key: &str) -> FarResult<Vec<(String, Bytes)>> {
        self.guard()?;
        let inner = self.inner.lock();
        Ok(inner
            .hashes
            .get(key)
            .map(|hash| {
                hash.iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let removed = inner
            .hashes
            .get_mut(key)
            .is_some_and(|hash| hash.remove(field).is_some());
        Ok(removed)
    }

    async fn list_push_back(&self, key: &str, value: Bytes) -> FarResult<u64> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value);
        Ok(list.len() as u64)
    }

    async fn list_pop_front(&self, key: &str) -> FarResult<Option<Bytes>> {
        self.guard()?;
        let mut inner = self.inner.lock();
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn list_len(&self, key: &str) -> FarResult<u64> {
        self.guard()?;
        let inner = self.inner.lock();
        Ok(inner.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn set_add(&self, key: &str, member: Bytes) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        Ok(inner.sets.entry(key.to_string()).or_default().insert(member))
    }

    async fn set_remove(&self, key: &str, member: Bytes) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        Ok(inner
            .sets
            .get_mut(key)
            .is_some_and(|set| set.remove(&member)))
    }

    async fn set_members(&self, key: &str) -> FarResult<Vec<Bytes>> {
        self.guard()?;
        let inner = self.inner.lock();
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sorted_set_add(&self, key: &str, member: Bytes, score: f64) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let zset = inner.zsets.entry(key.to_string()).or_default();
        if let Some(slot) = zset.iter_mut().find(|(existing, _)| *existing == member) {
            slot.1 = score;
            return Ok(false);
        }
        zset.push((member, score));
        Ok(true)
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> FarResult<Vec<Bytes>> {
        self.guard()?;
        let inner = self.inner.lock();
        let mut matches: Vec<(Bytes, f64)> = inner
            .zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(matches.into_iter().map(|(member, _)| member).collect())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> FarResult<u64> {
        self.guard()?;
        let sender = {
            let inner = self.inner.lock();
            inner.channels.get(channel).cloned()
        };
        // No subscriber at emission time: the message is lost by design.
        Ok(sender
            .and_then(|sender| sender.send(payload).ok())
            .map_or(0, |receivers| receivers as u64))
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> FarResult<Subscription> {
        self.guard()?;
        let mut receiver = {
            let mut inner = self.inner.lock();
            inner
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                    message = receiver.recv() => match message {
                        Ok(payload) => handler(payload),
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        Ok(Subscription::new(shutdown_tx, task))
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if inner.live_string(key, now).is_some() {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: Bytes) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let matches = inner
            .live_string(key, now)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            inner.strings.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: Bytes,
        ttl: Duration,
    ) -> FarResult<bool> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let matches = inner
            .live_string(key, now)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            if let Some(entry) = inner.strings.get_mut(key) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    fn bytes(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let store = MemoryFarStore::new();
        store.set("k", bytes(b"v"), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(bytes(b"v")));

        let removed = store.remove(&["k".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = MemoryFarStore::new();
        store
            .set("k", bytes(b"v"), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_resets_deadline_and_reports_missing_keys() {
        let store = MemoryFarStore::new();
        assert!(!store.expire("absent", Duration::from_secs(1)).await.unwrap());

        store.set("k", bytes(b"v"), None).await.unwrap();
        assert!(store.expire("k", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn multi_key_remove_counts_existing_keys() {
        let store = MemoryFarStore::new();
        store.set("a", bytes(b"1"), None).await.unwrap();
        store.set("b", bytes(b"2"), None).await.unwrap();

        let removed = store
            .remove(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn hash_fields_round_trip() {
        let store = MemoryFarStore::new();
        store.hash_set("h", "f1", bytes(b"1")).await.unwrap();
        store.hash_set("h", "f2", bytes(b"2")).await.unwrap();

        assert_eq!(store.hash_get("h", "f1").await.unwrap(), Some(bytes(b"1")));
        assert_eq!(store.hash_get("h", "missing").await.unwrap(), None);

        let mut all = store.hash_get_all("h").await.unwrap();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(all, vec![("f1".into(), bytes(b"1")), ("f2".into(), bytes(b"2"))]);

        assert!(store.hash_delete("h", "f1").await.unwrap());
        assert!(!store.hash_delete("h", "f1").await.unwrap());
    }

    #[tokio::test]
    async fn list_is_fifo() {
        let store = MemoryFarStore::new();
        store.list_push_back("q", bytes(b"a")).await.unwrap();
        store.list_push_back("q", bytes(b"b")).await.unwrap();
        assert_eq!(store.list_len("q").await.unwrap(), 2);

        assert_eq!(store.list_pop_front("q").await.unwrap(), Some(bytes(b"a")));
        assert_eq!(store.list_pop_front("q").await.unwrap(), Some(bytes(b"b")));
        assert_eq!(store.list_pop_front("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_add_is_idempotent() {
        let store = MemoryFarStore::new();
        assert!(store.set_add("s", bytes(b"m")).await.unwrap());
        assert!(!store.set_add("s", bytes(b"m")).await.unwrap());
        assert_eq!(store.set_members("s").await.unwrap().len(), 1);

        assert!(store.set_remove("s", bytes(b"m")).await.unwrap());
        assert!(!store.set_remove("s", bytes(b"m")).await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_ranges_ascending_by_score() {
        let store = MemoryFarStore::new();
        store.sorted_set_add("z", bytes(b"c"), 3.0).await.unwrap();
        store.sorted_set_add("z", bytes(b"a"), 1.0).await.unwrap();
        store.sorted_set_add("z", bytes(b"b"), 2.0).await.unwrap();

        let range = store.sorted_set_range_by_score("z", 1.0, 2.5).await.unwrap();
        assert_eq!(range, vec![bytes(b"a"), bytes(b"b")]);

        // Updating a score is not a new member.
        assert!(!store.sorted_set_add("z", bytes(b"a"), 9.0).await.unwrap());
        let range = store.sorted_set_range_by_score("z", 0.0, 10.0).await.unwrap();
        assert_eq!(range, vec![bytes(b"b"), bytes(b"c"), bytes(b"a")]);
    }

    #[tokio::test]
    async fn pub_sub_fans_out_to_all_subscribers() {
        let store = Arc::new(MemoryFarStore::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_count = Arc::clone(&first);
        let sub_a = store
            .subscribe(
                "events",
                Arc::new(move |_| {
                    first_count.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        let second_count = Arc::clone(&second);
        let sub_b = store
            .subscribe(
                "events",
                Arc::new(move |_| {
                    second_count.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        let receivers = store.publish("events", bytes(b"ping")).await.unwrap();
        assert_eq!(receivers, 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        sub_a.cancel().await;
        sub_b.cancel().await;
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_lost() {
        let store = MemoryFarStore::new();
        let receivers = store.publish("nobody", bytes(b"ping")).await.unwrap();
        assert_eq!(receivers, 0);
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_receiving() {
        let store = Arc::new(MemoryFarStore::new());
        let count = Arc::new(AtomicUsize::new(0));

        let task_count = Arc::clone(&count);
        let sub = store
            .subscribe(
                "events",
                Arc::new(move |_| {
                    task_count.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        sub.cancel().await;

        store.publish("events", bytes(b"after")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn set_if_absent_respects_live_entries() {
        let store = MemoryFarStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_if_absent("lock:r", bytes(b"t1"), ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:r", bytes(b"t2"), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn set_if_absent_wins_after_expiry() {
        let store = MemoryFarStore::new();
        let short = Duration::from_millis(10);
        assert!(store.set_if_absent("lock:r", bytes(b"t1"), short).await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store
            .set_if_absent("lock:r", bytes(b"t2"), Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_requires_matching_value() {
        let store = MemoryFarStore::new();
        let ttl = Duration::from_secs(10);
        store.set_if_absent("lock:r", bytes(b"owner"), ttl).await.unwrap();

        assert!(!store.compare_and_delete("lock:r", bytes(b"thief")).await.unwrap());
        assert!(store.get("lock:r").await.unwrap().is_some());

        assert!(store.compare_and_delete("lock:r", bytes(b"owner")).await.unwrap());
        assert!(store.get("lock:r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_expire_requires_matching_value() {
        let store = MemoryFarStore::new();
        store
            .set_if_absent("lock:r", bytes(b"owner"), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!store
            .compare_and_expire("lock:r", bytes(b"thief"), Duration::from_secs(99))
            .await
            .unwrap());
        assert!(store
            .compare_and_expire("lock:r", bytes(b"owner"), Duration::from_millis(10))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("lock:r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_fails_with_connection_errors() {
        let store = MemoryFarStore::new();
        store.set("k", bytes(b"v"), None).await.unwrap();

        store.set_unavailable(true);
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_transient());

        store.set_unavailable(false);
        assert_eq!(store.get("k").await.unwrap(), Some(bytes(b"v")));
    }
}
