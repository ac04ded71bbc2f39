//! Configuration types and loading
//!
//! The file path comes from `--config`, then `CONFIG_PATH`, then
//! `campus-fetch.toml` (resolved by the argument parser).
//! `CAMPUS_API_URL` overrides `api.base_url` from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use campus_auth::constants::REFRESH_PATH;
use campus_auth::{AuthEndpoints, SessionPolicy};
use campus_cache::CacheConfig;
use campus_client::{AuthSentinels, RequestDefaults};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// Content API and issuance route
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Full URL of the site's token issuance route
    pub token_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Replaces the built-in session sentinel messages when set
    #[serde(default)]
    pub auth_sentinels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_stale")]
    pub max_stale_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_access_margin")]
    pub access_margin_secs: u64,
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_secs: u64,
}

/// Where credentials and cached responses are persisted
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_stale_secs: default_max_stale(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            access_margin_secs: default_access_margin(),
            refresh_margin_secs: default_refresh_margin(),
            renewal_interval_secs: default_renewal_interval(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_base_delay() -> u64 {
    1000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_max_stale() -> u64 {
    7 * 24 * 3600
}

fn default_access_margin() -> u64 {
    300
}

fn default_refresh_margin() -> u64 {
    24 * 3600
}

fn default_renewal_interval() -> u64 {
    3600
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".campus-fetch")
}

fn validate_url(field: &str, url: &str) -> common::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("CAMPUS_API_URL") {
            config.api.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        validate_url("api.base_url", &self.api.base_url)?;
        validate_url("api.token_url", &self.api.token_url)?;

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.renewal_interval_secs == 0 {
            return Err(common::Error::Config(
                "renewal_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn endpoints(&self) -> AuthEndpoints {
        AuthEndpoints {
            token_url: self.api.token_url.clone(),
            refresh_url: format!("{}{REFRESH_PATH}", self.api.base_url.trim_end_matches('/')),
        }
    }

    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            timeout: Duration::from_secs(self.api.timeout_secs),
            retries: self.api.retries,
            base_delay: Duration::from_millis(self.api.base_delay_ms),
        }
    }

    pub fn sentinels(&self) -> AuthSentinels {
        match &self.api.auth_sentinels {
            Some(messages) => AuthSentinels::new(messages),
            None => AuthSentinels::default(),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.cache.ttl_secs),
            max_stale: Duration::from_secs(self.cache.max_stale_secs),
        }
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            access_margin: Duration::from_secs(self.session.access_margin_secs),
            refresh_margin: Duration::from_secs(self.session.refresh_margin_secs),
            renewal_interval: Duration::from_secs(self.session.renewal_interval_secs),
            request_timeout: Duration::from_secs(self.api.timeout_secs),
            ..SessionPolicy::default()
        }
    }
}
