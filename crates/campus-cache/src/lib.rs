//! Time-boxed response cache
//!
//! Stores prior successful responses through the shared `Storage` seam, each
//! with an expiry. Normal reads ignore expired entries; the degraded
//! `get_stale` read still returns them so a failed request can fall back to
//! the last known value. Writes never fail from the caller's point of view.

mod cache;

pub use cache::{CACHE_PREFIX, CacheConfig, CacheEntry, ResponseCache, cache_key};
