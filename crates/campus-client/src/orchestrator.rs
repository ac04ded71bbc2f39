//! Request orchestrator
//!
//! Performs one logical call: cache lookup, credential acquisition, the
//! network attempt with a per-attempt timeout, retry with exponential
//! backoff, one refresh-and-retry on a first-attempt 401, cache population,
//! and stale fallback. Every outcome is an `Envelope`; nothing is thrown
//! past this boundary.

use std::sync::Arc;

use campus_auth::SessionManager;
use campus_cache::ResponseCache;
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::decode::{AuthSentinels, decode_failure, decode_success};
use crate::descriptor::{RequestDefaults, RequestDescriptor};
use crate::envelope::{Envelope, Payload};
use crate::error::ClientError;
use crate::metrics;

/// Why a single attempt failed.
enum AttemptError {
    /// 401 while presenting `token`
    Unauthorized { token: String },
    Failed(ClientError),
}

/// Shared entry point for every call against the content API.
pub struct Orchestrator {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionManager>,
    cache: Arc<ResponseCache>,
    defaults: RequestDefaults,
    sentinels: AuthSentinels,
}

impl Orchestrator {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        session: Arc<SessionManager>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            session,
            cache,
            defaults: RequestDefaults::default(),
            sentinels: AuthSentinels::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_sentinels(mut self, sentinels: AuthSentinels) -> Self {
        self.sentinels = sentinels;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    /// Start a descriptor carrying this orchestrator's defaults.
    pub fn request(&self, method: Method, endpoint: impl Into<String>) -> RequestDescriptor {
        RequestDescriptor::with_defaults(method, endpoint, &self.defaults)
    }

    /// Execute `descriptor` and decode its data into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Envelope<T> {
        self.execute(descriptor, cancel).await.decode()
    }

    /// Execute one logical call.
    #[instrument(
        skip_all,
        fields(
            request_id = %uuid::Uuid::new_v4(),
            method = %descriptor.method,
            endpoint = %descriptor.endpoint,
        )
    )]
    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Envelope<Value> {
        let cache_key = descriptor.uses_cache().then(|| descriptor.cache_key());

        if let Some(key) = &cache_key
            && let Some(payload) = self.cache.get::<Payload>(key)
        {
            debug!("served from cache");
            metrics::record_cache_hit();
            metrics::record_outcome("cached");
            return Envelope::from_payload(payload);
        }

        match self.run_with_retries(descriptor, cancel).await {
            Ok(payload) => {
                if let Some(key) = &cache_key {
                    self.cache.set(key, &payload, descriptor.ttl);
                }
                metrics::record_outcome("fresh");
                Envelope::from_payload(payload)
            }
            Err(ClientError::Cancelled) => {
                debug!("request cancelled");
                metrics::record_outcome("cancelled");
                Envelope::failure(ClientError::Cancelled)
            }
            Err(err) => {
                if let Some(key) = &cache_key
                    && let Some(entry) = self.cache.get_stale::<Payload>(key)
                {
                    warn!(error = %err, stored_at = entry.stored_at, "request failed, serving stale entry");
                    metrics::record_outcome("stale");
                    return Envelope::stale(entry.data);
                }
                warn!(error = %err, "request failed");
                metrics::record_outcome("failed");
                Envelope::failure(err)
            }
        }
    }

    async fn run_with_retries(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Payload, ClientError> {
        let mut attempt = 0u32;
        let mut refreshed = false;

        loop {
            let err = match self.attempt(descriptor, cancel).await {
                Ok(payload) => return Ok(payload),
                Err(AttemptError::Unauthorized { token }) if attempt == 0 && !refreshed => {
                    refreshed = true;
                    info!("credential rejected, refreshing once");
                    metrics::record_auth_recovery("orchestrator");
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        result = self.session.force_refresh(&token) => result,
                    };
                    match result {
                        // Immediate retry at the same attempt index
                        Ok(_) => continue,
                        Err(e) => ClientError::from(e),
                    }
                }
                Err(AttemptError::Unauthorized { .. }) => {
                    return Err(ClientError::AuthRequired(
                        "credential rejected after refresh".to_string(),
                    ));
                }
                Err(AttemptError::Failed(err)) => err,
            };

            if !err.is_retryable() || attempt >= descriptor.retries {
                return Err(err);
            }

            let delay = descriptor.backoff(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, backing off"
            );
            metrics::record_retry();
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Payload, AttemptError> {
        if cancel.is_cancelled() {
            return Err(AttemptError::Failed(ClientError::Cancelled));
        }

        let token = if descriptor.authenticated {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(AttemptError::Failed(ClientError::Cancelled)),
                result = self.session.access_token() => result,
            };
            Some(result.map_err(|e| AttemptError::Failed(e.into()))?)
        } else {
            None
        };

        let url = self.url_for(descriptor).map_err(AttemptError::Failed)?;
        let mut request = self
            .http
            .request(descriptor.method.clone(), url)
            .header(ACCEPT, "application/json");
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &descriptor.body {
            request = request.json(body);
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Failed(ClientError::Cancelled)),
            result = tokio::time::timeout(descriptor.timeout, send) => match result {
                Err(_) => return Err(AttemptError::Failed(ClientError::Timeout(descriptor.timeout))),
                Ok(Err(e)) if e.is_timeout() => {
                    return Err(AttemptError::Failed(ClientError::Timeout(descriptor.timeout)));
                }
                Ok(Err(e)) => return Err(AttemptError::Failed(ClientError::Transport(e.to_string()))),
                Ok(Ok(response)) => response,
            },
        };

        debug!(status = status.as_u16(), "response received");

        if status == StatusCode::UNAUTHORIZED {
            return Err(match token {
                Some(token) => AttemptError::Unauthorized { token },
                None => AttemptError::Failed(ClientError::AuthRequired(
                    decode_failure(status.as_u16(), &body, &self.sentinels).to_string(),
                )),
            });
        }

        if status.is_success() {
            decode_success(status.as_u16(), &body, &self.sentinels).map_err(AttemptError::Failed)
        } else {
            Err(AttemptError::Failed(decode_failure(
                status.as_u16(),
                &body,
                &self.sentinels,
            )))
        }
    }

    fn url_for(&self, descriptor: &RequestDescriptor) -> Result<Url, ClientError> {
        let base = self.base_url.trim_end_matches('/');
        let endpoint = descriptor.endpoint.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{endpoint}"))
            .map_err(|e| ClientError::InvalidRequest(format!("{}: {e}", descriptor.endpoint)))?;
        if !descriptor.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&descriptor.params);
        }
        Ok(url)
    }
}
