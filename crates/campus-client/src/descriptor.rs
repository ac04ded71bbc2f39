//! Request descriptors
//!
//! A `RequestDescriptor` is everything the orchestrator needs to perform one
//! logical call, including its timeout and retry knobs. Callers build one,
//! hand it over by reference, and never change it afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;

/// Per-attempt timeout used when a descriptor does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// First backoff delay; attempt `n` waits `base_delay × 2^n`.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Timeout and retry defaults applied to new descriptors.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub timeout: Duration,
    pub retries: u32,
    pub base_delay: Duration,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// One logical call against the content API.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Path below the API base, e.g. `/news`
    pub endpoint: String,
    pub method: Method,
    /// Query parameters, ordered so the cache key is deterministic
    pub params: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Consult and populate the cache (read-only methods only)
    pub cacheable: bool,
    /// Cache lifetime; the cache default applies when unset
    pub ttl: Option<Duration>,
    pub timeout: Duration,
    pub retries: u32,
    pub base_delay: Duration,
    /// Attach the bearer credential
    pub authenticated: bool,
}

impl RequestDescriptor {
    /// A descriptor with the default knobs. GETs are cacheable by default.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self::with_defaults(method, endpoint, &RequestDefaults::default())
    }

    pub fn with_defaults(
        method: Method,
        endpoint: impl Into<String>,
        defaults: &RequestDefaults,
    ) -> Self {
        let cacheable = method == Method::GET;
        Self {
            endpoint: endpoint.into(),
            method,
            params: BTreeMap::new(),
            body: None,
            cacheable,
            ttl: None,
            timeout: defaults.timeout,
            retries: defaults.retries,
            base_delay: defaults.base_delay,
            authenticated: true,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, endpoint).body(body)
    }

    pub fn put(endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, endpoint).body(body)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Whether the method cannot change server state.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Whether this call reads from and writes to the cache.
    pub fn uses_cache(&self) -> bool {
        self.cacheable && self.is_read()
    }

    pub fn cache_key(&self) -> String {
        campus_cache::cache_key(&self.endpoint, &self.params)
    }

    /// Delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let d = RequestDescriptor::get("/news");
        assert_eq!(d.timeout, Duration::from_secs(30));
        assert_eq!(d.retries, 2);
        assert_eq!(d.base_delay, Duration::from_secs(1));
        assert!(d.cacheable);
        assert!(d.authenticated);
    }

    #[test]
    fn writes_are_never_cached() {
        let d = RequestDescriptor::post("/admissions", serde_json::json!({})).cacheable(true);
        assert!(!d.uses_cache());
        assert!(!RequestDescriptor::delete("/news/3").cacheable);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let d = RequestDescriptor::get("/x").base_delay(Duration::from_millis(100));
        assert_eq!(d.backoff(0), Duration::from_millis(100));
        assert_eq!(d.backoff(1), Duration::from_millis(200));
        assert_eq!(d.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn cache_key_includes_params() {
        let d = RequestDescriptor::get("/news")
            .param("page", "2")
            .param("category", "events");
        assert_eq!(d.cache_key(), r#"/news_{"category":"events","page":"2"}"#);
        assert_eq!(RequestDescriptor::get("/gallery").cache_key(), "/gallery_{}");
    }
}
