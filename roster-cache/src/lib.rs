//! Response cache for the console's API layer.
//!
//! A TTL store with access-ordered eviction, optionally mirrored to durable
//! storage so warm data survives restarts. Fetches on a miss run through the
//! shared [`roster_resilience::RetryExecutor`], and a failed refresh falls
//! back to the last known value when there is one.

mod cache;
mod error;
pub mod mirror;
mod store;

pub use cache::{CacheEntry, CacheEntryState, MirroredEntry};
pub use error::CacheError;
pub use mirror::{CacheMirror, FileMirror, MemoryMirror};
pub use store::{CacheOptions, CacheStats, CacheStore, key_scope};
