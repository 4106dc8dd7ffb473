//! TTL cache with access-ordered eviction and a durable mirror.
//!
//! Values are kept as JSON so any serde type can be cached and mirrored
//! without the store knowing about it. Keys are opaque strings; by convention
//! `"<namespace>:<params>"`, where the namespace doubles as the breaker scope
//! for [`CacheStore::get_or_fetch`].
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use roster_resilience::{RequestError, RetryExecutor};
use serde::{Serialize, de::DeserializeOwned};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{CacheEntry, CacheError, CacheMirror, MirroredEntry};

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub capacity: usize,
    /// Share of `capacity` evicted when the store overflows.
    pub eviction_ratio: f64,
    pub default_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: 500,
            eviction_ratio: 0.2,
            default_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stale_served: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    access_counter: u64,
    stats: CacheStats,
}

impl CacheInner {
    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }
}

pub struct CacheStore {
    options: CacheOptions,
    inner: Mutex<CacheInner>,
    mirror: Option<Arc<dyn CacheMirror>>,
    executor: Arc<RetryExecutor>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("options", &self.options)
            .field("entries", &self.len())
            .field("mirror", &self.mirror)
            .finish()
    }
}

/// Namespace part of a cache key, used as the breaker scope.
pub fn key_scope(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

impl CacheStore {
    pub fn new(options: CacheOptions, executor: Arc<RetryExecutor>) -> Self {
        Self {
            options,
            inner: Mutex::new(CacheInner::default()),
            mirror: None,
            executor,
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn CacheMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Warm the in-memory map from the mirror, dropping expired entries.
    /// Returns the number of restored entries.
    pub fn restore(&self) -> usize {
        let Some(mirror) = &self.mirror else {
            return 0;
        };
        let stored = match mirror.load_all() {
            Ok(stored) => stored,
            Err(err) => {
                warn!("unable to read cache mirror: {err}");
                return 0;
            }
        };

        let wall_now = Utc::now();
        let now = Instant::now();
        let mut restored = 0;
        let mut expired = Vec::new();
        {
            let mut inner = self.lock();
            for (key, raw) in stored {
                let entry: MirroredEntry = match serde_json::from_str(&raw) {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!(key, "dropping undecodable mirrored entry: {err}");
                        expired.push(key);
                        continue;
                    }
                };
                let remaining = match (entry.expires_at - wall_now).to_std() {
                    Ok(remaining) if !remaining.is_zero() => remaining,
                    _ => {
                        expired.push(key);
                        continue;
                    }
                };
                let last_access = inner.next_access();
                inner.entries.insert(
                    key,
                    CacheEntry {
                        value: entry.value,
                        created_at: now,
                        expires_at: now + remaining,
                        last_access,
                    },
                );
                restored += 1;
            }
            inner.stats.entries = inner.entries.len();
        }

        for key in expired {
            self.unmirror(&key);
        }
        debug!(restored, "cache restored from mirror");
        restored
    }

    /// Store `value` for `ttl`, evicting old entries when over capacity.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_value(key, value, ttl);
        Ok(())
    }

    fn set_value(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let now = Instant::now();
        let wall_now = Utc::now();
        let mirrored = MirroredEntry {
            key: key.to_string(),
            value: value.clone(),
            created_at: wall_now,
            expires_at: chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| wall_now.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let evicted = {
            let mut inner = self.lock();
            let last_access = inner.next_access();
            inner.entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    created_at: now,
                    expires_at: now + ttl,
                    last_access,
                },
            );
            let evicted = self.enforce_capacity(&mut inner, now);
            inner.stats.entries = inner.entries.len();
            evicted
        };

        for key in &evicted {
            self.unmirror(key);
        }
        self.mirror_entry(&mirrored);
        trace!(key, ?ttl, "cache set");
    }

    /// Drop expired entries, then the least recently used ones, until the
    /// store fits its capacity. Returns removed keys.
    fn enforce_capacity(&self, inner: &mut CacheInner, now: Instant) -> Vec<String> {
        if inner.entries.len() <= self.options.capacity {
            return Vec::new();
        }

        let mut removed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            inner.entries.remove(key);
        }

        if inner.entries.len() > self.options.capacity {
            let batch = ((self.options.capacity as f64 * self.options.eviction_ratio)
                .ceil() as usize)
                .max(inner.entries.len() - self.options.capacity);
            let mut by_age: Vec<(u64, String)> = inner
                .entries
                .iter()
                .map(|(key, entry)| (entry.last_access, key.clone()))
                .collect();
            by_age.sort_unstable();
            for (_, key) in by_age.into_iter().take(batch) {
                inner.entries.remove(&key);
                removed.push(key);
            }
        }

        inner.stats.evictions += removed.len() as u64;
        debug!(evicted = removed.len(), "cache over capacity");
        removed
    }

    /// Fresh value for `key`, or `None`. Expired or undecodable entries are
    /// removed on the way.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let value = {
            let mut inner = self.lock();
            let fresh = match inner.entries.get(key) {
                Some(entry) => !entry.is_expired(now),
                None => {
                    inner.stats.misses += 1;
                    return None;
                }
            };
            if fresh {
                let access = inner.next_access();
                inner.stats.hits += 1;
                inner.entries.get_mut(key).map(|entry| {
                    entry.last_access = access;
                    entry.value.clone()
                })
            } else {
                inner.entries.remove(key);
                inner.stats.misses += 1;
                inner.stats.entries = inner.entries.len();
                None
            }
        };

        match value {
            Some(value) => match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    warn!(key, "cached value has unexpected shape: {err}");
                    self.remove(key);
                    None
                }
            },
            None => {
                self.unmirror(key);
                None
            }
        }
    }

    /// Entry value regardless of expiry, with its freshness.
    fn peek(&self, key: &str) -> Option<(serde_json::Value, bool)> {
        let now = Instant::now();
        let mut inner = self.lock();
        let access = inner.next_access();
        let entry = inner.entries.get_mut(key)?;
        let fresh = !entry.is_expired(now);
        if fresh {
            entry.last_access = access;
        }
        Some((entry.value.clone(), fresh))
    }

    /// Cached value unless absent or `force_refresh`; otherwise fetch through
    /// the retry executor and cache the result.
    ///
    /// When the fetch fails and an older (possibly expired) value exists, that
    /// value is served instead of the error. Cancellation always propagates.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
        force_refresh: bool,
    ) -> Result<T, RequestError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let ttl = ttl.unwrap_or(self.options.default_ttl);
        let previous = self.peek(key);

        if let Some((value, true)) = &previous {
            if !force_refresh {
                match serde_json::from_value::<T>(value.clone()) {
                    Ok(decoded) => {
                        self.lock().stats.hits += 1;
                        trace!(key, "cache hit");
                        return Ok(decoded);
                    }
                    Err(err) => {
                        warn!(key, "cached value has unexpected shape: {err}");
                    }
                }
            }
        }
        self.lock().stats.misses += 1;

        match self.executor.execute(fetch, key_scope(key)).await {
            Ok(fetched) => {
                match serde_json::to_value(&fetched) {
                    Ok(serde_json::Value::Null) => {
                        debug!(key, "fetched null, not caching");
                    }
                    Ok(value) => self.set_value(key, value, ttl),
                    Err(err) => warn!(key, "fetched value not cacheable: {err}"),
                }
                Ok(fetched)
            }
            // a cancelled refresh was superseded, not failed
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                let stale = previous
                    .and_then(|(value, _)| serde_json::from_value::<T>(value).ok());
                match stale {
                    Some(stale) => {
                        self.lock().stats.stale_served += 1;
                        warn!(key, error = %err, "refresh failed, serving stale cache entry");
                        Ok(stale)
                    }
                    None => Err(err),
                }
            }
        }
    }

    pub fn remove(&self, key: &str) {
        {
            let mut inner = self.lock();
            inner.entries.remove(key);
            inner.stats.entries = inner.entries.len();
        }
        self.unmirror(key);
    }

    /// Remove every key starting with `prefix`; returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed: Vec<String> = {
            let mut inner = self.lock();
            let keys: Vec<String> = inner
                .entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            for key in &keys {
                inner.entries.remove(key);
            }
            inner.stats.entries = inner.entries.len();
            keys
        };
        for key in &removed {
            self.unmirror(key);
        }
        debug!(prefix, removed = removed.len(), "cache prefix invalidated");
        removed.len()
    }

    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.entries.clear();
            inner.stats.entries = 0;
        }
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.clear() {
                warn!("unable to clear cache mirror: {err}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    fn mirror_entry(&self, entry: &MirroredEntry) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let encoded = match serde_json::to_string(entry) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key = %entry.key, "unable to encode entry for mirror: {err}");
                return;
            }
        };
        if let Err(err) = mirror.store(&entry.key, &encoded) {
            warn!(key = %entry.key, "skipping cache mirror write: {err}");
        }
    }

    fn unmirror(&self, key: &str) {
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.remove(key) {
                warn!(key, "unable to remove entry from cache mirror: {err}");
            }
        }
    }
}
