//! Distributed advisory mutex over the far store's atomic primitives.
//!
//! Acquire is a single `SET if-absent with TTL`; release and extend are
//! server-side compare-and-act scripts keyed on a per-handle token. The
//! token is the only proof of ownership, so a handle can never release or
//! extend a lock another handle (or a later takeover) holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use heytom_core::{lock_key, validate_key};
use uuid::Uuid;

use crate::error::{CacheError, CacheResult};
use crate::far::FarStore;

/// Named advisory lock shared through the far tier.
///
/// Each handle owns a freshly generated token; two handles for the same
/// resource compete like two processes would.
pub struct DistributedMutex {
    far: Arc<dyn FarStore>,
    resource: String,
    key: String,
    token: String,
    ttl: Duration,
    held: AtomicBool,
}

impl DistributedMutex {
    /// Creates a handle for `resource` with the given lock TTL.
    pub fn new(far: Arc<dyn FarStore>, resource: &str, ttl: Duration) -> CacheResult<Self> {
        validate_key(resource)?;
        Ok(Self {
            far,
            resource: resource.to_string(),
            key: lock_key(resource),
            token: Uuid::new_v4().to_string(),
            ttl,
            held: AtomicBool::new(false),
        })
    }

    /// Attempts to take the lock once.
    ///
    /// Acquiring an already-held handle is a no-op returning success.
    pub async fn acquire(&self) -> CacheResult<bool> {
        if self.held.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let acquired = self
            .far
            .set_if_absent(&self.key, Bytes::from(self.token.clone()), self.ttl)
            .await
            .map_err(|source| CacheError::BackendUnavailable { source })?;
        if acquired {
            self.held.store(true, Ordering::SeqCst);
        }
        Ok(acquired)
    }

    /// Retries [`acquire`](Self::acquire) every `retry_interval` until it
    /// succeeds or `wait` elapses. Dropping the future cancels the wait.
    pub async fn acquire_within(&self, wait: Duration, retry_interval: Duration) -> CacheResult<bool> {
        let deadline = Instant::now() + wait;
        loop {
            if self.acquire().await? {
                return Ok(true);
            }
            if Instant::now() + retry_interval > deadline {
                return Ok(false);
            }
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Releases the lock.
    ///
    /// Returns false when this handle does not hold the lock locally, or
    /// when the scripted delete finds another owner (the lock expired and
    /// was taken over).
    pub async fn release(&self) -> CacheResult<bool> {
        if !self.held.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let released = self
            .far
            .compare_and_delete(&self.key, Bytes::from(self.token.clone()))
            .await
            .map_err(|source| CacheError::BackendUnavailable { source })?;
        Ok(released)
    }

    /// Extends the lock's TTL.
    ///
    /// Returns false when the handle does not hold the lock or ownership was
    /// lost; a lost lock also clears the local held flag.
    pub async fn extend(&self, ttl: Duration) -> CacheResult<bool> {
        if !self.held.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let extended = self
            .far
            .compare_and_expire(&self.key, Bytes::from(self.token.clone()), ttl)
            .await
            .map_err(|source| CacheError::BackendUnavailable { source })?;
        if !extended {
            self.held.store(false, Ordering::SeqCst);
        }
        Ok(extended)
    }

    /// Releases once if held, logging failures instead of surfacing them.
    pub async fn close(&self) {
        if !self.held.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.release().await {
            tracing::warn!(resource = %self.resource, error = %err, "lock release on close failed");
        }
    }

    /// Whether this handle believes it holds the lock.
    ///
    /// Advisory: the far-tier TTL may have expired since the last call.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// The resource this handle guards.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::far::MemoryFarStore;

    fn far() -> Arc<dyn FarStore> {
        Arc::new(MemoryFarStore::new())
    }

    fn mutex(far: &Arc<dyn FarStore>, ttl_ms: u64) -> DistributedMutex {
        DistributedMutex::new(Arc::clone(far), "job", Duration::from_millis(ttl_ms)).unwrap()
    }

    #[tokio::test]
    async fn exactly_one_concurrent_acquire_wins() {
        let far = far();
        let first = mutex(&far, 10_000);
        let second = mutex(&far, 10_000);

        let (a, b) = tokio::join!(first.acquire(), second.acquire());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a ^ b, "exactly one winner, got ({a}, {b})");

        // Winner releases; the loser's next acquire succeeds.
        let (winner, loser) = if a { (first, second) } else { (second, first) };
        assert!(winner.release().await.unwrap());
        assert!(loser.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn reacquiring_a_held_lock_is_a_no_op() {
        let far = far();
        let lock = mutex(&far, 10_000);
        assert!(lock.acquire().await.unwrap());
        assert!(lock.acquire().await.unwrap());
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn release_without_holding_is_a_silent_no_op() {
        let far = far();
        let holder = mutex(&far, 10_000);
        let bystander = mutex(&far, 10_000);

        assert!(holder.acquire().await.unwrap());
        assert!(!bystander.release().await.unwrap());

        // The holder's lock is untouched.
        assert!(!bystander.acquire().await.unwrap());
        assert!(holder.release().await.unwrap());
    }

    #[tokio::test]
    async fn stale_handle_cannot_release_a_taken_over_lock() {
        let far = far();
        let stale = mutex(&far, 20);
        assert!(stale.acquire().await.unwrap());

        // Let the TTL lapse and a new owner take over.
        tokio::time::sleep(Duration::from_millis(40)).await;
        let new_owner = mutex(&far, 10_000);
        assert!(new_owner.acquire().await.unwrap());

        // The stale handle's token no longer matches: silent false.
        assert!(!stale.release().await.unwrap());
        assert!(new_owner.is_held());
        assert!(new_owner.release().await.unwrap());
    }

    #[tokio::test]
    async fn extend_prolongs_a_held_lock() {
        let far = far();
        let lock = mutex(&far, 30);
        assert!(lock.acquire().await.unwrap());
        assert!(lock.extend(Duration::from_millis(200)).await.unwrap());

        // Past the original TTL the lock is still held remotely.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let contender = mutex(&far, 10_000);
        assert!(!contender.acquire().await.unwrap());

        assert!(lock.release().await.unwrap());
    }

    #[tokio::test]
    async fn extend_detects_lost_ownership() {
        let far = far();
        let lock = mutex(&far, 20);
        assert!(lock.acquire().await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!lock.extend(Duration::from_secs(1)).await.unwrap());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn acquire_within_waits_out_the_current_holder() {
        let far = far();
        let holder = mutex(&far, 40);
        assert!(holder.acquire().await.unwrap());

        let waiter = mutex(&far, 10_000);
        let acquired = waiter
            .acquire_within(Duration::from_millis(500), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(acquired, "waiter wins once the holder's TTL lapses");
    }

    #[tokio::test]
    async fn acquire_within_times_out_against_a_live_holder() {
        let far = far();
        let holder = mutex(&far, 10_000);
        assert!(holder.acquire().await.unwrap());

        let waiter = mutex(&far, 10_000);
        let acquired = waiter
            .acquire_within(Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(!acquired);
    }

    #[tokio::test]
    async fn close_releases_once() {
        let far = far();
        let lock = mutex(&far, 10_000);
        assert!(lock.acquire().await.unwrap());
        lock.close().await;

        let next = mutex(&far, 10_000);
        assert!(next.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn blank_resources_are_rejected() {
        let far = far();
        assert!(DistributedMutex::new(far, "  ", Duration::from_secs(1)).is_err());
    }
}
