//! In-process near tier.

pub mod store;

pub use store::{EvictionListener, EvictionReason, NearStore};
