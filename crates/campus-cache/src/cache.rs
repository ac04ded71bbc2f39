//! Cache entries, keys and the `ResponseCache` itself
//!
//! Entries live in storage under `cache:{endpoint}_{params}` as
//! `{ "data", "storedAt", "expiresAt" }` JSON, times in unix milliseconds.
//! An entry is overwritten on every successful fetch, never merged.
//!
//! Expiry is lazy. A normal read of an expired entry reports a miss but
//! leaves the record in place for the stale fallback; only once an entry has
//! been expired for longer than `max_stale` does a read delete it. A failed
//! write sweeps every expired entry and tries once more.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, Storage, millis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Storage key prefix separating cache records from credential records.
pub const CACHE_PREFIX: &str = "cache:";

/// TTL and stale-retention settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of an entry when the caller does not give one
    pub default_ttl: Duration,
    /// How long past expiry an entry is kept for stale reads
    pub max_stale: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_stale: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// A cached payload with its timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: u64,
    pub expires_at: u64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryExpiry {
    expires_at: u64,
}

/// Deterministic key for an endpoint and its request parameters.
///
/// Pass parameters as an ordered map (`BTreeMap`) so equal parameter sets
/// always serialize identically.
pub fn cache_key<P: Serialize + ?Sized>(endpoint: &str, params: &P) -> String {
    let serialized = serde_json::to_string(params).unwrap_or_default();
    format!("{endpoint}_{serialized}")
}

/// Response cache over a `Storage` medium.
pub struct ResponseCache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value` under `key` for `ttl` (or the default TTL).
    ///
    /// Never fails. If the medium rejects the write, expired entries are
    /// swept and the write is tried once more before being dropped.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let now = self.clock.now_millis();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry {
            data: value,
            stored_at: now,
            expires_at: now.saturating_add(millis(ttl)),
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "cache entry not serializable, skipping");
                return;
            }
        };

        let storage_key = storage_key(key);
        if let Err(e) = self.storage.set(&storage_key, &json) {
            debug!(key, error = %e, "cache write failed, sweeping expired entries");
            let swept = self.sweep_expired();
            if let Err(e) = self.storage.set(&storage_key, &json) {
                warn!(key, swept, error = %e, "cache write dropped");
            }
        }
    }

    /// Fresh read: `None` when missing or expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.read_entry::<T>(key)?;
        if entry.is_expired(self.clock.now_millis()) {
            debug!(key, "cache entry expired");
            return None;
        }
        Some(entry.data)
    }

    /// Degraded read: returns the entry even if it has expired.
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        self.read_entry(key)
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.storage.remove(&storage_key(key)) {
            warn!(key, error = %e, "failed to remove cache entry");
        }
    }

    /// Drop every cached variant of `endpoint`, whatever its parameters.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let prefix = format!("{CACHE_PREFIX}{endpoint}_");
        self.remove_where(|key| key.starts_with(&prefix))
    }

    /// Remove all cache entries. Other records in the medium are untouched.
    pub fn clear(&self) -> usize {
        self.remove_where(|key| key.starts_with(CACHE_PREFIX))
    }

    /// Remove every expired or unreadable entry, returning how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        for key in self.storage.keys() {
            if !key.starts_with(CACHE_PREFIX) {
                continue;
            }
            let expired = self
                .storage
                .get(&key)
                .and_then(|raw| serde_json::from_str::<EntryExpiry>(&raw).ok())
                .is_none_or(|entry| now > entry.expires_at);
            if expired && self.storage.remove(&key).is_ok() {
                removed += 1;
            }
        }
        debug!(removed, "swept expired cache entries");
        removed
    }

    /// Keys of all cached entries, without the storage prefix.
    pub fn keys(&self) -> Vec<String> {
        self.storage
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(CACHE_PREFIX).map(String::from))
            .collect()
    }

    fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let storage_key = storage_key(key);
        let raw = self.storage.get(&storage_key)?;
        let entry = match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "unreadable cache entry, removing");
                let _ = self.storage.remove(&storage_key);
                return None;
            }
        };

        let now = self.clock.now_millis();
        let retain_until = entry
            .expires_at
            .saturating_add(millis(self.config.max_stale));
        if now > retain_until {
            debug!(key, "cache entry past stale retention, removing");
            let _ = self.storage.remove(&storage_key);
            return None;
        }
        Some(entry)
    }

    fn remove_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut removed = 0;
        for key in self.storage.keys() {
            if predicate(&key) && self.storage.remove(&key).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

fn storage_key(key: &str) -> String {
    format!("{CACHE_PREFIX}{key}")
}
