//! Invalidation transport riding the far store's pub/sub surface.
//!
//! The lightweight option: no extra broker, events flow over the same server
//! the cache already talks to. Messages published while no subscriber is
//! listening are lost, which the invalidation contract tolerates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use heytom_core::InvalidationEvent;

use super::{InvalidationError, InvalidationHandler, InvalidationPublisher, InvalidationSubscriber};
use crate::far::{FarStore, MessageHandler, Subscription};

/// Publisher + subscriber over [`FarStore`] pub/sub.
pub struct FarStorePubSub {
    far: Arc<dyn FarStore>,
    channel: String,
    subscribed: AtomicBool,
    /// Serializes subscription (re)establishment.
    subscription: tokio::sync::Mutex<Option<Subscription>>,
}

impl FarStorePubSub {
    /// Creates a transport bound to one pub/sub channel.
    #[must_use]
    pub fn new(far: Arc<dyn FarStore>, channel: impl Into<String>) -> Self {
        Self {
            far,
            channel: channel.into(),
            subscribed: AtomicBool::new(false),
            subscription: tokio::sync::Mutex::new(None),
        }
    }

    /// The channel this transport publishes and subscribes on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl InvalidationPublisher for FarStorePubSub {
    async fn publish(&self, event: &InvalidationEvent) -> Result<(), InvalidationError> {
        let payload = serde_json::to_vec(event)?;
        self.far.publish(&self.channel, Bytes::from(payload)).await?;
        Ok(())
    }

    async fn publish_batch(&self, events: &[InvalidationEvent]) -> usize {
        let mut delivered = 0;
        for event in events {
            match self.publish(event).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(key = %event.key, error = %err, "invalidation publish failed");
                }
            }
        }
        delivered
    }
}

#[async_trait]
impl InvalidationSubscriber for FarStorePubSub {
    async fn subscribe(&self, handler: InvalidationHandler) -> Result<(), InvalidationError> {
        let mut slot = self.subscription.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let decoding: MessageHandler = Arc::new(move |payload: Bytes| {
            match serde_json::from_slice::<InvalidationEvent>(&payload) {
                Ok(event) => handler(event),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping undecodable invalidation event");
                }
            }
        });

        let subscription = self.far.subscribe(&self.channel, decoding).await?;
        *slot = Some(subscription);
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe(&self) {
        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.cancel().await;
        }
        self.subscribed.store(false, Ordering::SeqCst);
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
}
