//! Typed helpers beside the byte-oriented coordinator.
//!
//! The coordinator trades in bytes; applications trade in types. These
//! helpers bridge the two without pulling serialization into the core:
//! a pluggable [`Serializer`], a [`TypedCache`] wrapper, and a
//! get-or-compute composition with single-flight stampede protection.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use heytom_core::ExpirationOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::HybridCache;
use crate::error::CacheResult;

/// Pluggable value codec.
pub trait Serializer: Send + Sync {
    /// Encodes a value to cache bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Bytes>;

    /// Decodes cache bytes back into a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T>;
}

/// JSON codec; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

type InFlightMap = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Removes the in-flight entry even when the computation fails or panics.
struct CleanupGuard<'a> {
    map: &'a InFlightMap,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Typed view over a [`HybridCache`].
pub struct TypedCache<S = JsonSerializer> {
    cache: Arc<HybridCache>,
    serializer: S,
    in_flight: InFlightMap,
}

impl TypedCache<JsonSerializer> {
    /// Wraps a cache with the JSON codec.
    #[must_use]
    pub fn new(cache: Arc<HybridCache>) -> Self {
        Self::with_serializer(cache, JsonSerializer)
    }
}

impl<S: Serializer> TypedCache<S> {
    /// Wraps a cache with a custom codec.
    #[must_use]
    pub fn with_serializer(cache: Arc<HybridCache>, serializer: S) -> Self {
        Self {
            cache,
            serializer,
            in_flight: DashMap::new(),
        }
    }

    /// Fetches and decodes a value.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.cache.get(key).await? {
            Some(bytes) => Ok(Some(self.serializer.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encodes and writes a value.
    pub async fn set_as<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: ExpirationOptions,
    ) -> CacheResult<()> {
        let bytes = self.serializer.encode(value)?;
        self.cache.set(key, bytes, expiration).await
    }

    /// Fetches a value, computing and caching it on a miss.
    ///
    /// Concurrent misses on one key are collapsed into a single factory run
    /// per instance; the others wait and re-read the populated entry.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        expiration: ExpirationOptions,
        factory: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        if let Some(value) = self.get_as(key).await? {
            return Ok(value);
        }

        let gate = {
            let entry = self
                .in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
            Arc::clone(entry.value())
        };
        let _cleanup = CleanupGuard {
            map: &self.in_flight,
            key: key.to_string(),
        };
        let _serialized = gate.lock().await;

        // A concurrent computation may have populated the key while we
        // waited on the gate.
        if let Some(value) = self.get_as(key).await? {
            return Ok(value);
        }

        let value = factory().await?;
        self.set_as(key, &value, expiration).await?;
        Ok(value)
    }
}
