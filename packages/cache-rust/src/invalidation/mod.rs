//! Cross-instance invalidation fan-out.
//!
//! Publisher and subscriber seams over a fan-out transport: every live
//! subscriber sees every event. Delivery is best-effort: a lost event only
//! widens the staleness window, because TTLs still bound every near entry
//! and writes land on the authoritative far tier first.
//!
//! One transport ships in-tree ([`FarStorePubSub`], riding the far store's
//! pub/sub surface); broker-based transports plug in through the same trait
//! pair.

pub mod on_store;

use std::sync::Arc;

use async_trait::async_trait;
use heytom_core::InvalidationEvent;

pub use on_store::FarStorePubSub;

use crate::far::FarStoreError;

/// Callback invoked with each decoded invalidation event.
///
/// Runs on a transport-owned task and must be re-entrancy-safe.
pub type InvalidationHandler = Arc<dyn Fn(InvalidationEvent) + Send + Sync>;

/// Failures raised by the invalidation transport.
#[derive(Debug, thiserror::Error)]
pub enum InvalidationError {
    /// The underlying transport failed.
    #[error("invalidation transport failure")]
    Transport(#[from] FarStoreError),
    /// The event could not be encoded for the wire.
    #[error("invalidation event encoding failed")]
    Encode(#[from] serde_json::Error),
}

/// Emits invalidation events to every peer.
#[async_trait]
pub trait InvalidationPublisher: Send + Sync + 'static {
    /// Publishes one event.
    async fn publish(&self, event: &InvalidationEvent) -> Result<(), InvalidationError>;

    /// Publishes a batch, returning how many events went out.
    async fn publish_batch(&self, events: &[InvalidationEvent]) -> usize;
}

/// Consumes invalidation events from peers.
#[async_trait]
pub trait InvalidationSubscriber: Send + Sync + 'static {
    /// Starts consuming events into `handler`. Idempotent while subscribed.
    async fn subscribe(&self, handler: InvalidationHandler) -> Result<(), InvalidationError>;

    /// Stops consuming and releases transport resources.
    async fn unsubscribe(&self);

    /// Whether a subscription is currently active.
    fn is_subscribed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies the trait pair is object safe.
    #[test]
    fn traits_are_object_safe() {
        fn _publisher(_: &Arc<dyn InvalidationPublisher>) {}
        fn _subscriber(_: &Arc<dyn InvalidationSubscriber>) {}
    }
}
