//! `HeyTom` Cache Core -- expiration semantics, invalidation wire schema, key conventions.
//!
//! This crate is the I/O-free foundation of the two-tier cache:
//!
//! - **Expiration** ([`expiration`]): absolute/sliding options and their
//!   resolution into an effective TTL
//! - **Events** ([`events`]): the JSON invalidation event broadcast between
//!   instances
//! - **Keys** ([`keys`]): key validation plus the sliding-metadata and lock
//!   key conventions shared across processes

pub mod events;
pub mod expiration;
pub mod keys;

// Events
pub use events::{InvalidationEvent, InvalidationKind};

// Expiration
pub use expiration::{ExpirationError, ExpirationOptions, ResolvedExpiration};

// Keys
pub use keys::{
    lock_key, sliding_metadata_key, validate_key, InvalidKey, DEFAULT_INVALIDATION_CHANNEL,
    LOCK_KEY_PREFIX, SLIDING_METADATA_SUFFIX,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    /// Verify all re-exports are accessible from the crate root.
    #[test]
    fn reexports_accessible() {
        let _options = ExpirationOptions::none();
        let _resolved = ResolvedExpiration::never();
        let _kind = InvalidationKind::Update;
        let _ = validate_key("k");
        let _ = sliding_metadata_key("k");
        let _ = lock_key("r");
        let _ = DEFAULT_INVALIDATION_CHANNEL;
    }
}
