//! The hybrid cache coordinator.
//!
//! Composes the near store, the far store, the resilience pipeline, metrics,
//! and invalidation fan-out into the public key/value contract:
//!
//! - Reads try the near tier first, then the far tier through the pipeline,
//!   writing far hits through to the near tier.
//! - Writes land on the far tier first, then the near tier, then emit a
//!   fire-and-forget invalidation event.
//! - When the far tier stays down through the pipeline and a near tier
//!   exists, reads serve possibly-stale entries and writes persist locally;
//!   without a near tier the failure surfaces as a categorized error.
//!
//! Within one operation on one key, far effects strictly precede near
//! effects. Across operations and instances there is no ordering; the near
//! tier converges through invalidation delivery or entry TTLs.

pub mod blocking;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use heytom_core::{
    sliding_metadata_key, validate_key, ExpirationOptions, InvalidationEvent, InvalidationKind,
    ResolvedExpiration,
};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::far::{FarStore, MessageHandler, RedisFarStore, Subscription};
use crate::invalidation::{
    FarStorePubSub, InvalidationHandler, InvalidationPublisher, InvalidationSubscriber,
};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::near::NearStore;
use crate::resilience::ResiliencePipeline;

/// Two-tier cache coordinator.
///
/// Safe to share across any number of concurrent tasks; all suspending work
/// happens on far-tier and transport I/O. Construct with
/// [`HybridCache::connect`] (Redis far tier) or
/// [`HybridCache::with_far_store`] (any [`FarStore`]).
pub struct HybridCache {
    config: CacheConfig,
    /// Effective instance identity stamped on outgoing invalidation events.
    source: Option<String>,
    far: Arc<dyn FarStore>,
    near: Option<Arc<NearStore>>,
    pipeline: ResiliencePipeline,
    metrics: Arc<CacheMetrics>,
    invalidation: Option<Arc<FarStorePubSub>>,
    disposed: AtomicBool,
}

impl HybridCache {
    /// Connects to the Redis far tier named in the config.
    pub async fn connect(config: CacheConfig) -> CacheResult<Arc<Self>> {
        let far = RedisFarStore::connect(&config.far_connection_string)
            .await
            .map_err(|source| CacheError::BackendUnavailable { source })?;
        Ok(Self::with_far_store(config, Arc::new(far)))
    }

    /// Assembles a cache over a caller-provided far store.
    ///
    /// Must run inside a Tokio runtime: the invalidation subscription starts
    /// as a background task. Initial subscription failures are logged and
    /// tolerated; the far tier stays authoritative either way.
    #[must_use]
    pub fn with_far_store(config: CacheConfig, far: Arc<dyn FarStore>) -> Arc<Self> {
        let near = config.near_cache_enabled.then(|| {
            let store = Arc::new(NearStore::new(
                config.near_cache_max_size,
                config.near_cache_default_expiration,
            ));
            store.set_eviction_listener(Arc::new(|key, reason| {
                tracing::debug!(key, ?reason, "near entry dropped");
            }));
            store
        });

        let pipeline =
            ResiliencePipeline::new(config.resilience.clone(), config.far_operation_timeout);
        let metrics = Arc::new(CacheMetrics::new(config.metrics_enabled));
        let source = config
            .source
            .clone()
            .or_else(|| Some(Uuid::new_v4().to_string()));
        let invalidation = (config.invalidation_enabled && config.near_cache_enabled).then(|| {
            Arc::new(FarStorePubSub::new(
                Arc::clone(&far),
                config.invalidation_channel.clone(),
            ))
        });

        let cache = Arc::new(Self {
            config,
            source,
            far,
            near,
            pipeline,
            metrics,
            invalidation,
            disposed: AtomicBool::new(false),
        });

        if let (Some(transport), Some(near)) = (&cache.invalidation, &cache.near) {
            let transport = Arc::clone(transport);
            let handler = Self::invalidation_handler(Arc::clone(near), cache.source.clone());
            let weak = Arc::downgrade(&cache);
            tokio::spawn(async move {
                // Skip when the cache was closed before this task ran.
                let still_open = weak
                    .upgrade()
                    .is_some_and(|cache| !cache.disposed.load(Ordering::SeqCst));
                if !still_open {
                    return;
                }
                if let Err(err) = transport.subscribe(handler).await {
                    tracing::warn!(
                        error = %err,
                        "invalidation subscription failed; near tiers rely on TTLs until it recovers"
                    );
                }
            });
        }

        cache
    }

    /// Builds the inbound-event handler.
    ///
    /// Takes only the near-store reference and the instance identity, never
    /// the coordinator, so subscriber and coordinator cannot form a cycle.
    fn invalidation_handler(near: Arc<NearStore>, own_source: Option<String>) -> InvalidationHandler {
        Arc::new(move |event: InvalidationEvent| {
            if event.key.is_empty() {
                return;
            }
            // Skip self-delivered events: without this, every write would
            // erase its own freshly-written near entry a moment later.
            if own_source.is_some() && event.source == own_source {
                return;
            }
            tracing::debug!(key = %event.key, kind = ?event.kind, "invalidation received");
            near.remove(&event.key);
        })
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    fn publish_event(&self, key: &str, kind: InvalidationKind) {
        let Some(transport) = &self.invalidation else {
            return;
        };
        let transport = Arc::clone(transport);
        let event = InvalidationEvent::new(key, kind, self.source.clone());
        // Fire-and-forget: publish failures never reach the caller.
        tokio::spawn(async move {
            if let Err(err) = transport.publish(&event).await {
                tracing::warn!(key = %event.key, error = %err, "invalidation publish failed");
            }
        });
    }

    /// Fetches a value, trying the near tier before the far tier.
    ///
    /// A far hit is written through to the near tier with the configured
    /// default expiration (not the far entry's remaining TTL); invalidation
    /// delivery and the default budget bound the resulting staleness. When
    /// the far tier stays down through the pipeline, the near tier answers
    /// instead: a stale value beats an error.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.ensure_open()?;
        validate_key(key)?;
        let started = Instant::now();

        if let Some(near) = &self.near {
            if let Some(value) = near.get(key) {
                self.metrics.record_near_hit();
                self.metrics.record_read_duration(started.elapsed(), true);
                return Ok(Some(value));
            }
        }

        let far = Arc::clone(&self.far);
        let lookup = key.to_string();
        let outcome = self
            .pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let key = lookup.clone();
                async move { far.get(&key).await }
            })
            .await;

        match outcome {
            Ok(Some(value)) => {
                if let Some(near) = &self.near {
                    near.set(key, value.clone(), None);
                }
                self.metrics.record_far_hit();
                self.metrics.record_read_duration(started.elapsed(), true);
                Ok(Some(value))
            }
            Ok(None) => {
                self.metrics.record_miss();
                self.metrics.record_read_duration(started.elapsed(), false);
                Ok(None)
            }
            Err(err) if err.is_degradable() && self.near.is_some() => {
                tracing::warn!(key, error = %err, "far tier unavailable; serving read from near tier");
                let value = self.near.as_ref().and_then(|near| near.get(key));
                let hit = value.is_some();
                if hit {
                    self.metrics.record_near_hit();
                } else {
                    self.metrics.record_miss();
                }
                self.metrics.record_read_duration(started.elapsed(), hit);
                Ok(value)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes a value to both tiers.
    ///
    /// The far write (including the sliding-metadata sibling, which shares
    /// the primary TTL) goes through the resilience pipeline first; the near
    /// write and the invalidation event follow. On a transient far failure
    /// with a near tier present, the write persists locally and the call
    /// succeeds.
    pub async fn set(&self, key: &str, value: Bytes, expiration: ExpirationOptions) -> CacheResult<()> {
        self.ensure_open()?;
        validate_key(key)?;
        let resolved = if expiration.is_none() {
            None
        } else {
            Some(expiration.resolve(Utc::now())?)
        };
        let started = Instant::now();

        let ttl = resolved.as_ref().and_then(ResolvedExpiration::initial_ttl);
        let sliding_seconds = resolved
            .as_ref()
            .and_then(|resolved| resolved.sliding)
            .map(|window| window.as_secs().max(1));

        let far = Arc::clone(&self.far);
        let primary = key.to_string();
        let sibling = sliding_metadata_key(key);
        let payload = value.clone();
        let outcome = self
            .pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let primary = primary.clone();
                let sibling = sibling.clone();
                let payload = payload.clone();
                async move {
                    far.set(&primary, payload, ttl).await?;
                    if let Some(seconds) = sliding_seconds {
                        far.set(&sibling, Bytes::from(seconds.to_string()), ttl).await?;
                    }
                    Ok(())
                }
            })
            .await;

        let result = match outcome {
            Ok(()) => {
                if let Some(near) = &self.near {
                    near.set(key, value, resolved);
                }
                self.publish_event(key, InvalidationKind::Update);
                Ok(())
            }
            Err(err) if err.is_degradable() && self.near.is_some() => {
                tracing::warn!(key, error = %err, "far tier unavailable; write persists in near tier only");
                if let Some(near) = &self.near {
                    near.set(key, value, resolved);
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        };

        self.metrics.record_operation_duration("set", started.elapsed());
        result
    }

    /// Removes a key from both tiers.
    ///
    /// The far delete covers the primary key and its sliding-metadata
    /// sibling in one atomic multi-key command.
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        validate_key(key)?;
        let started = Instant::now();

        let far = Arc::clone(&self.far);
        let keys = vec![key.to_string(), sliding_metadata_key(key)];
        let outcome = self
            .pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let keys = keys.clone();
                async move { far.remove(&keys).await }
            })
            .await;

        let result = match outcome {
            Ok(_removed) => {
                if let Some(near) = &self.near {
                    near.remove(key);
                }
                self.publish_event(key, InvalidationKind::Remove);
                Ok(())
            }
            Err(err) if err.is_degradable() && self.near.is_some() => {
                tracing::warn!(key, error = %err, "far tier unavailable; removed from near tier only");
                if let Some(near) = &self.near {
                    near.remove(key);
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        };

        self.metrics.record_operation_duration("remove", started.elapsed());
        result
    }

    /// Bumps the sliding TTL in both tiers.
    ///
    /// Best-effort: when the entry has expired or carries no sliding
    /// metadata, the call returns quietly.
    pub async fn refresh(&self, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        validate_key(key)?;
        let started = Instant::now();

        let far = Arc::clone(&self.far);
        let primary = key.to_string();
        let sibling = sliding_metadata_key(key);
        let outcome = self
            .pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let primary = primary.clone();
                let sibling = sibling.clone();
                async move {
                    let Some(stored) = far.get(&sibling).await? else {
                        return Ok(());
                    };
                    let Some(seconds) = decode_sliding_seconds(&stored) else {
                        return Ok(());
                    };
                    let window = Duration::from_secs(seconds);
                    far.expire(&primary, window).await?;
                    far.expire(&sibling, window).await?;
                    Ok(())
                }
            })
            .await;

        let result = match outcome {
            Ok(()) => {
                if let Some(near) = &self.near {
                    near.refresh(key);
                }
                Ok(())
            }
            Err(err) if err.is_degradable() && self.near.is_some() => {
                tracing::warn!(key, error = %err, "far tier unavailable; refreshed near tier only");
                if let Some(near) = &self.near {
                    near.refresh(key);
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        };

        self.metrics.record_operation_duration("refresh", started.elapsed());
        result
    }

    // --- Far-tier data structures (delegated through the pipeline) ---

    /// Sets a hash field.
    pub async fn hash_set(&self, key: &str, field: &str, value: Bytes) -> CacheResult<()> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let (key, field) = (key.to_string(), field.to_string());
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (key, field, value) = (key.clone(), field.clone(), value.clone());
                async move { far.hash_set(&key, &field, value).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Fetches a hash field.
    pub async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Bytes>> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let (key, field) = (key.to_string(), field.to_string());
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (key, field) = (key.clone(), field.clone());
                async move { far.hash_get(&key, &field).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Fetches all fields of a hash.
    pub async fn hash_get_all(&self, key: &str) -> CacheResult<Vec<(String, Bytes)>> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let key = key.clone();
                async move { far.hash_get_all(&key).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Deletes a hash field, returning whether it existed.
    pub async fn hash_delete(&self, key: &str, field: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let (key, field) = (key.to_string(), field.to_string());
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (key, field) = (key.clone(), field.clone());
                async move { far.hash_delete(&key, &field).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Appends to the tail of a list, returning the new length.
    pub async fn list_push_back(&self, key: &str, value: Bytes) -> CacheResult<u64> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (key, value) = (key.clone(), value.clone());
                async move { far.list_push_back(&key, value).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Removes and returns the head of a list.
    pub async fn list_pop_front(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let key = key.clone();
                async move { far.list_pop_front(&key).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Returns the length of a list.
    pub async fn list_len(&self, key: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let key = key.clone();
                async move { far.list_len(&key).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Adds a member to a set. Idempotent.
    pub async fn set_add(&self, key: &str, member: Bytes) -> CacheResult<bool> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (key, member) = (key.clone(), member.clone());
                async move { far.set_add(&key, member).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Removes a member from a set.
    pub async fn set_remove(&self, key: &str, member: Bytes) -> CacheResult<bool> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (key, member) = (key.clone(), member.clone());
                async move { far.set_remove(&key, member).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Returns all members of a set.
    pub async fn set_members(&self, key: &str) -> CacheResult<Vec<Bytes>> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let key = key.clone();
                async move { far.set_members(&key).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Adds a member to a sorted set with the given score.
    pub async fn sorted_set_add(&self, key: &str, member: Bytes, score: f64) -> CacheResult<bool> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (key, member) = (key.clone(), member.clone());
                async move { far.sorted_set_add(&key, member, score).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Returns sorted-set members within the score range, ascending.
    pub async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> CacheResult<Vec<Bytes>> {
        self.ensure_open()?;
        validate_key(key)?;
        let far = Arc::clone(&self.far);
        let key = key.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let key = key.clone();
                async move { far.sorted_set_range_by_score(&key, min, max).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Publishes a payload on a named far-tier channel.
    pub async fn publish(&self, channel: &str, payload: Bytes) -> CacheResult<u64> {
        self.ensure_open()?;
        let far = Arc::clone(&self.far);
        let channel = channel.to_string();
        self.pipeline
            .run(move || {
                let far = Arc::clone(&far);
                let (channel, payload) = (channel.clone(), payload.clone());
                async move { far.publish(&channel, payload).await }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Subscribes a raw handler to a named far-tier channel.
    ///
    /// The returned handle owns the subscription; cancel it to stop.
    pub async fn subscribe(&self, channel: &str, handler: MessageHandler) -> CacheResult<Subscription> {
        self.ensure_open()?;
        self.far
            .subscribe(channel, handler)
            .await
            .map_err(|source| CacheError::BackendUnavailable { source })
    }

    // --- Introspection and lifecycle ---

    /// A consistent snapshot of the cache counters. Always succeeds.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zeroes the cache counters.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Whether the near tier is active.
    #[must_use]
    pub fn is_near_cache_enabled(&self) -> bool {
        self.near.is_some()
    }

    /// The configuration this instance was built with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Shuts the coordinator down: unsubscribes from invalidation, clears
    /// the near tier, and closes the far client. Idempotent; every
    /// subsequent operation fails with `Disposed`.
    pub async fn close(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(transport) = &self.invalidation {
            transport.unsubscribe().await;
        }
        if let Some(near) = &self.near {
            near.clear();
        }
        if let Err(err) = self.far.close().await {
            tracing::debug!(error = %err, "far client close reported an error");
        }
    }
}

fn decode_sliding_seconds(raw: &Bytes) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}
