//! Blocking facade over the async coordinator.
//!
//! Owns a private current-thread runtime and drives the async coordinator to
//! completion per call, the way the `redis` crate's sync API rides its async
//! core. Both flavors share one implementation, so their observable
//! semantics are identical.
//!
//! Background work (the invalidation subscription, fire-and-forget event
//! publishing) progresses while the runtime is driven, i.e. during calls on
//! this facade.

use std::sync::Arc;

use bytes::Bytes;
use heytom_core::ExpirationOptions;
use tokio::runtime::{Builder, Runtime};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::far::{FarStore, MessageHandler, Subscription};
use crate::metrics::MetricsSnapshot;

/// Synchronous variants of the cache operations.
pub struct HybridCache {
    runtime: Runtime,
    inner: Arc<super::HybridCache>,
}

impl HybridCache {
    /// Connects to the Redis far tier named in the config.
    pub fn connect(config: CacheConfig) -> CacheResult<Self> {
        let runtime = blocking_runtime()?;
        let inner = runtime.block_on(super::HybridCache::connect(config))?;
        Ok(Self { runtime, inner })
    }

    /// Assembles a blocking cache over a caller-provided far store.
    pub fn with_far_store(config: CacheConfig, far: Arc<dyn FarStore>) -> CacheResult<Self> {
        let runtime = blocking_runtime()?;
        let inner = runtime.block_on(async { super::HybridCache::with_far_store(config, far) });
        Ok(Self { runtime, inner })
    }

    /// The async coordinator backing this facade.
    #[must_use]
    pub fn as_async(&self) -> &Arc<super::HybridCache> {
        &self.inner
    }

    /// Fetches a value. See [`super::HybridCache::get`].
    pub fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.runtime.block_on(self.inner.get(key))
    }

    /// Writes a value. See [`super::HybridCache::set`].
    pub fn set(&self, key: &str, value: Bytes, expiration: ExpirationOptions) -> CacheResult<()> {
        self.runtime.block_on(self.inner.set(key, value, expiration))
    }

    /// Removes a key. See [`super::HybridCache::remove`].
    pub fn remove(&self, key: &str) -> CacheResult<()> {
        self.runtime.block_on(self.inner.remove(key))
    }

    /// Bumps the sliding TTL in both tiers.
    pub fn refresh(&self, key: &str) -> CacheResult<()> {
        self.runtime.block_on(self.inner.refresh(key))
    }

    /// Sets a hash field.
    pub fn hash_set(&self, key: &str, field: &str, value: Bytes) -> CacheResult<()> {
        self.runtime.block_on(self.inner.hash_set(key, field, value))
    }

    /// Fetches a hash field.
    pub fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Bytes>> {
        self.runtime.block_on(self.inner.hash_get(key, field))
    }

    /// Fetches all fields of a hash.
    pub fn hash_get_all(&self, key: &str) -> CacheResult<Vec<(String, Bytes)>> {
        self.runtime.block_on(self.inner.hash_get_all(key))
    }

    /// Deletes a hash field.
    pub fn hash_delete(&self, key: &str, field: &str) -> CacheResult<bool> {
        self.runtime.block_on(self.inner.hash_delete(key, field))
    }

    /// Appends to the tail of a list.
    pub fn list_push_back(&self, key: &str, value: Bytes) -> CacheResult<u64> {
        self.runtime.block_on(self.inner.list_push_back(key, value))
    }

    /// Removes and returns the head of a list.
    pub fn list_pop_front(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.runtime.block_on(self.inner.list_pop_front(key))
    }

    /// Returns the length of a list.
    pub fn list_len(&self, key: &str) -> CacheResult<u64> {
        self.runtime.block_on(self.inner.list_len(key))
    }

    /// Adds a member to a set.
    pub fn set_add(&self, key: &str, member: Bytes) -> CacheResult<bool> {
        self.runtime.block_on(self.inner.set_add(key, member))
    }

    /// Removes a member from a set.
    pub fn set_remove(&self, key: &str, member: Bytes) -> CacheResult<bool> {
        self.runtime.block_on(self.inner.set_remove(key, member))
    }

    /// Returns all members of a set.
    pub fn set_members(&self, key: &str) -> CacheResult<Vec<Bytes>> {
        self.runtime.block_on(self.inner.set_members(key))
    }

    /// Adds a member to a sorted set.
    pub fn sorted_set_add(&self, key: &str, member: Bytes, score: f64) -> CacheResult<bool> {
        self.runtime.block_on(self.inner.sorted_set_add(key, member, score))
    }

    /// Returns sorted-set members within the score range, ascending.
    pub fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> CacheResult<Vec<Bytes>> {
        self.runtime
            .block_on(self.inner.sorted_set_range_by_score(key, min, max))
    }

    /// Publishes a payload on a named far-tier channel.
    pub fn publish(&self, channel: &str, payload: Bytes) -> CacheResult<u64> {
        self.runtime.block_on(self.inner.publish(channel, payload))
    }

    /// Subscribes a raw handler to a named far-tier channel.
    pub fn subscribe(&self, channel: &str, handler: MessageHandler) -> CacheResult<Subscription> {
        self.runtime.block_on(self.inner.subscribe(channel, handler))
    }

    /// A consistent snapshot of the cache counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics()
    }

    /// Zeroes the cache counters.
    pub fn reset_metrics(&self) {
        self.inner.reset_metrics();
    }

    /// Whether the near tier is active.
    #[must_use]
    pub fn is_near_cache_enabled(&self) -> bool {
        self.inner.is_near_cache_enabled()
    }

    /// Shuts the coordinator down. Idempotent.
    pub fn close(&self) {
        self.runtime.block_on(self.inner.close());
    }
}

fn blocking_runtime() -> CacheResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CacheError::Internal(format!("blocking runtime could not start: {err}")))
}
