use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Freshness of a cached value at lookup time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheEntryState {
    /// Within its TTL
    Fresh,
    /// Past its TTL, only served when a refresh fails
    Stale,
}

/// An in-memory cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached payload
    pub value: serde_json::Value,
    /// When this entry was stored
    pub created_at: Instant,
    /// The entry is never returned as fresh once `now > expires_at`
    pub expires_at: Instant,
    /// Access-order counter, lowest is evicted first
    pub last_access: u64,
}

impl CacheEntry {
    pub fn state_at(&self, now: Instant) -> CacheEntryState {
        if now > self.expires_at {
            CacheEntryState::Stale
        } else {
            CacheEntryState::Fresh
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.state_at(now) == CacheEntryState::Stale
    }
}

/// Durable form of an entry, written to the cache mirror with wall-clock
/// timestamps so it survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirroredEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
