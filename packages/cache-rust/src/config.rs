//! Cache configuration.

use std::time::Duration;

use heytom_core::DEFAULT_INVALIDATION_CHANNEL;

use crate::resilience::ResilienceConfig;

/// Configuration for a [`HybridCache`](crate::cache::HybridCache) instance.
///
/// Defaults favor a local Redis with a modest near tier; production
/// deployments usually override the connection string and the near-tier
/// sizing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Far-tier address, e.g. `redis://cache.internal:6379`.
    pub far_connection_string: String,
    /// Whether the in-process near tier is active. When false, every
    /// near-tier path (including the invalidation subscription) is skipped.
    pub near_cache_enabled: bool,
    /// Near-tier capacity in entries.
    pub near_cache_max_size: usize,
    /// Expiration applied to near entries written without explicit options,
    /// including read-through population after a far hit.
    pub near_cache_default_expiration: Duration,
    /// Deadline applied to each far-tier attempt before it is classified as
    /// a retryable timeout.
    pub far_operation_timeout: Duration,
    /// Whether hit/miss counters and duration metrics are recorded.
    pub metrics_enabled: bool,
    /// Whether invalidation events are published and consumed. Effective
    /// only when the near tier is enabled.
    pub invalidation_enabled: bool,
    /// Pub/sub channel carrying invalidation events.
    pub invalidation_channel: String,
    /// Identifier stamped on outgoing invalidation events and used to skip
    /// self-delivered ones. Defaults to a per-instance random id; set it to
    /// the hostname when one id per machine is wanted.
    pub source: Option<String>,
    /// Retry and circuit-breaker tuning for far-tier calls.
    pub resilience: ResilienceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            far_connection_string: "redis://127.0.0.1:6379".to_string(),
            near_cache_enabled: true,
            near_cache_max_size: 1000,
            near_cache_default_expiration: Duration::from_secs(300),
            far_operation_timeout: Duration::from_secs(5),
            metrics_enabled: true,
            invalidation_enabled: true,
            invalidation_channel: DEFAULT_INVALIDATION_CHANNEL.to_string(),
            source: None,
            resilience: ResilienceConfig::default(),
        }
    }
}
