//! Key conventions shared by every tier and every process.
//!
//! The sliding-metadata sibling and the lock prefix are wire-level contracts:
//! any process talking to the same far store must derive them identically.

/// Suffix of the sibling entry holding a key's sliding window in seconds.
pub const SLIDING_METADATA_SUFFIX: &str = ":metadata:sliding";

/// Prefix of distributed-lock keys.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Default pub/sub channel for invalidation fan-out.
pub const DEFAULT_INVALIDATION_CHANNEL: &str = "heytom:cache:invalidation";

/// A cache key was empty or all-whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cache keys must be non-empty and contain a non-whitespace character")]
pub struct InvalidKey;

/// Validates a caller-provided cache key.
pub fn validate_key(key: &str) -> Result<(), InvalidKey> {
    if key.trim().is_empty() {
        Err(InvalidKey)
    } else {
        Ok(())
    }
}

/// The sibling key carrying `key`'s sliding window (decimal seconds).
///
/// The sibling always shares the primary key's TTL so both disappear
/// together.
#[must_use]
pub fn sliding_metadata_key(key: &str) -> String {
    format!("{key}{SLIDING_METADATA_SUFFIX}")
}

/// The far-store key guarding `resource` for the distributed mutex.
#[must_use]
pub fn lock_key(resource: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{resource}")
}
