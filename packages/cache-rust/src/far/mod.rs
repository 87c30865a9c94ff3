//! Far-tier storage seam.
//!
//! Defines [`FarStore`], the byte-level surface the coordinator consumes for
//! the shared remote tier: key/value with TTL, the hash/list/set/sorted-set
//! structures, pub/sub, and the atomic primitives backing the distributed
//! mutex. Implementations are used as `Arc<dyn FarStore>`.
//!
//! Two implementations ship in-tree: [`RedisFarStore`] for production and
//! [`MemoryFarStore`] for tests and local development.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use self::memory::MemoryFarStore;
pub use self::redis::RedisFarStore;

/// Result alias for far-tier operations.
pub type FarResult<T> = Result<T, FarStoreError>;

/// Classified far-tier failure.
///
/// `Connection` and `Timeout` are the transient class: they enter the retry +
/// circuit-breaker pipeline and qualify for near-tier degradation. `Response`
/// means the server answered with an error; it is neither retried nor counted
/// against the circuit.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FarStoreError {
    /// The connection failed, dropped, or was refused.
    #[error("far-tier connection failure: {0}")]
    Connection(String),
    /// The operation did not complete within its deadline.
    #[error("far-tier operation timed out: {0}")]
    Timeout(String),
    /// The server rejected the command.
    #[error("far-tier response error: {0}")]
    Response(String),
}

impl FarStoreError {
    /// Whether this failure is retryable and eligible for degradation.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Callback invoked with each raw pub/sub payload.
///
/// Runs on a transport-owned task; implementations must not block.
pub type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Handle owning a live pub/sub subscription task.
///
/// [`Subscription::cancel`] performs an orderly stop; dropping the handle
/// without cancelling aborts the task.
#[derive(Debug)]
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Signals the subscription task to stop and waits for it to finish.
    pub async fn cancel(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Byte-level surface of the shared remote tier.
///
/// Contracts the coordinator relies on:
///
/// - `set` with a TTL arranges server-side expiry; callers that also write a
///   sliding-metadata sibling pass the same TTL so both disappear together.
/// - `remove` deletes all given keys in one atomic command.
/// - Lists are FIFO: `list_push_back` appends to the tail, `list_pop_front`
///   removes from the head, so pushes of `a` then `b` pop as `a` then `b`.
/// - `set_add` is idempotent; `sorted_set_range_by_score` returns members in
///   ascending score order.
/// - Pub/sub is fan-out, best-effort: every live subscriber sees every
///   message, and messages published with no subscriber are lost.
#[async_trait]
pub trait FarStore: Send + Sync + 'static {
    /// Fetches a value. `None` when the key is missing or expired.
    async fn get(&self, key: &str) -> FarResult<Option<Bytes>>;

    /// Writes a value, optionally with a server-side TTL.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> FarResult<()>;

    /// Deletes all given keys atomically, returning how many existed.
    async fn remove(&self, keys: &[String]) -> FarResult<u64>;

    /// Resets a key's TTL. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> FarResult<bool>;

    // --- Hash ---

    /// Sets a hash field.
    async fn hash_set(&self, key: &str, field: &str, value: Bytes) -> FarResult<()>;

    /// Fetches a hash field.
    async fn hash_get(&self, key: &str, field: &str) -> FarResult<Option<Bytes>>;

    /// Fetches all fields of a hash.
    async fn hash_get_all(&self, key: &str) -> FarResult<Vec<(String, Bytes)>>;

    /// Deletes a hash field, returning whether it existed.
    async fn hash_delete(&self, key: &str, field: &str) -> FarResult<bool>;

    // --- List (FIFO: push tail, pop head) ---

    /// Appends to the tail of a list, returning the new length.
    async fn list_push_back(&self, key: &str, value: Bytes) -> FarResult<u64>;

    /// Removes and returns the head of a list.
    async fn list_pop_front(&self, key: &str) -> FarResult<Option<Bytes>>;

    /// Returns the list length.
    async fn list_len(&self, key: &str) -> FarResult<u64>;

    // --- Set ---

    /// Adds a member. Returns false when it was already present.
    async fn set_add(&self, key: &str, member: Bytes) -> FarResult<bool>;

    /// Removes a member, returning whether it was present.
    async fn set_remove(&self, key: &str, member: Bytes) -> FarResult<bool>;

    /// Returns all members of a set.
    async fn set_members(&self, key: &str) -> FarResult<Vec<Bytes>>;

    // --- Sorted set ---

    /// Adds a member with a score, updating the score when it exists.
    /// Returns true when the member was newly added.
    async fn sorted_set_add(&self, key: &str, member: Bytes, score: f64) -> FarResult<bool>;

    /// Returns members with `min <= score <= max`, ascending by score.
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> FarResult<Vec<Bytes>>;

    // --- Pub/sub ---

    /// Publishes a payload, returning the number of receiving subscribers.
    async fn publish(&self, channel: &str, payload: Bytes) -> FarResult<u64>;

    /// Subscribes a handler to a channel.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> FarResult<Subscription>;

    // --- Atomic primitives for the distributed mutex ---

    /// Writes `value` with `ttl` only when the key is absent.
    /// Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> FarResult<bool>;

    /// Atomically deletes the key when its value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: Bytes) -> FarResult<bool>;

    /// Atomically resets the key's TTL when its value equals `expected`.
    async fn compare_and_expire(&self, key: &str, expected: Bytes, ttl: Duration)
        -> FarResult<bool>;

    /// Releases client resources. Default is a no-op.
    async fn close(&self) -> FarResult<()> {
        Ok(())
    }
}
