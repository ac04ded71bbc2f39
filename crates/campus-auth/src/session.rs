//! Session manager: the credential state machine
//!
//! States over one credential:
//! - Unissued → Issued: first caller needing a token triggers issuance
//! - Issued → Refreshing: access token within `access_margin` of expiry
//! - Refreshing → Issued: refresh succeeded, credential replaced in one step
//! - Refreshing → Unissued → Issued: refresh token expired or refresh failed,
//!   so a fresh credential is issued instead of surfacing an error
//!
//! All transitions happen under one async mutex, so concurrent callers wait
//! for an in-progress refresh instead of starting their own.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{
    ACCESS_REFRESH_MARGIN, AUTH_REQUEST_TIMEOUT, DEFAULT_REFRESH_TTL, ISSUE_PATH, REFRESH_PATH,
    REFRESH_RENEWAL_MARGIN, RENEWAL_INTERVAL,
};
use crate::credentials::{Credential, TokenStore};
use crate::error::{Error, Result};
use crate::token;

/// Where credentials are issued and refreshed.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    /// Full URL of the site's issuance route
    pub token_url: String,
    /// Full URL of the content API's refresh route
    pub refresh_url: String,
}

impl AuthEndpoints {
    /// Derive both URLs from the site origin and the content API base.
    pub fn new(site_url: &str, api_base: &str) -> Self {
        Self {
            token_url: format!("{}{ISSUE_PATH}", site_url.trim_end_matches('/')),
            refresh_url: format!("{}{REFRESH_PATH}", api_base.trim_end_matches('/')),
        }
    }
}

/// Expiry margins and renewal cadence.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub access_margin: Duration,
    pub refresh_margin: Duration,
    pub renewal_interval: Duration,
    pub default_refresh_ttl: Duration,
    pub request_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            access_margin: ACCESS_REFRESH_MARGIN,
            refresh_margin: REFRESH_RENEWAL_MARGIN,
            renewal_interval: RENEWAL_INTERVAL,
            default_refresh_ttl: DEFAULT_REFRESH_TTL,
            request_timeout: AUTH_REQUEST_TIMEOUT,
        }
    }
}

/// Owner of the process's single credential.
pub struct SessionManager {
    store: TokenStore,
    http: reqwest::Client,
    endpoints: AuthEndpoints,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<Credential>>,
    pub(crate) renewal: std::sync::Mutex<Option<CancellationToken>>,
}

impl SessionManager {
    /// Create a manager, picking up any credential already in the store.
    pub fn new(
        store: TokenStore,
        http: reqwest::Client,
        endpoints: AuthEndpoints,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let existing = store.load();
        info!(restored = existing.is_some(), "session manager initialized");
        Self {
            store,
            http,
            endpoints,
            policy,
            clock,
            state: Mutex::new(existing),
            renewal: std::sync::Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Snapshot of the current credential, if issued.
    pub async fn credential(&self) -> Option<Credential> {
        self.state.lock().await.clone()
    }

    /// Return a usable access token, issuing or refreshing as needed.
    pub async fn access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        let now = self.clock.now_millis();

        if let Some(current) = state.as_ref() {
            if !current.access_expires_within(now, self.policy.access_margin) {
                return Ok(current.access_token.expose().clone());
            }
            debug!("access token within refresh margin");
        }

        self.renew_locked(&mut state).await
    }

    /// Refresh after the content API rejected `rejected` with a 401.
    ///
    /// If another caller already replaced that token, the current one is
    /// returned without another round trip.
    pub async fn force_refresh(&self, rejected: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(current) = state.as_ref()
            && current.access_token.expose() != rejected
            && !current.access_expires_within(self.clock.now_millis(), self.policy.access_margin)
        {
            debug!("rejected token already replaced");
            return Ok(current.access_token.expose().clone());
        }
        self.renew_locked(&mut state).await
    }

    /// Discard the current credential and issue a new one.
    ///
    /// Used when the content API reports a missing or invalid session in the
    /// response body rather than through a 401.
    pub async fn reauthenticate(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        *state = None;
        self.store.clear();
        info!("re-authenticating");
        self.issue_locked(&mut state).await
    }

    /// Clear the credential from memory and storage.
    pub async fn logout(&self) {
        let mut state = self.state.lock().await;
        *state = None;
        self.store.clear();
        info!("credential cleared");
    }

    /// Proactive renewal check run by the background task.
    ///
    /// Renews when the refresh token expires within `refresh_margin`.
    /// Returns whether a renewal happened. Does nothing while unissued.
    pub async fn renew_if_due(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = self.clock.now_millis();
        match state.as_ref() {
            None => {
                debug!("no credential issued, skipping renewal");
                Ok(false)
            }
            Some(current) if current.refresh_expires_within(now, self.policy.refresh_margin) => {
                info!("refresh token nearing expiry, renewing");
                self.renew_locked(&mut state).await.map(|_| true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Refresh if possible, otherwise issue. Caller holds the state lock.
    async fn renew_locked(&self, state: &mut Option<Credential>) -> Result<String> {
        let now = self.clock.now_millis();
        let refreshed = match state.as_ref() {
            Some(current) => match self.refresh_locked(current, now).await {
                Ok(refreshed) => Some(refreshed),
                Err(e) => {
                    warn!(error = %e, "refresh failed, falling back to issuance");
                    None
                }
            },
            None => None,
        };
        if let Some(refreshed) = refreshed {
            return Ok(self.install(state, refreshed));
        }
        *state = None;
        self.store.clear();
        self.issue_locked(state).await
    }

    async fn refresh_locked(&self, current: &Credential, now: u64) -> Result<Credential> {
        if current.refresh_expired(now) {
            return Err(Error::RefreshExpired);
        }
        let response = token::refresh_token(
            &self.http,
            &self.endpoints.refresh_url,
            current.refresh_token.expose(),
            self.policy.request_timeout,
        )
        .await?;
        let refreshed = current.refreshed(
            response,
            self.clock.now_millis(),
            self.policy.default_refresh_ttl,
        );
        info!("access token refreshed");
        Ok(refreshed)
    }

    async fn issue_locked(&self, state: &mut Option<Credential>) -> Result<String> {
        let response =
            token::issue_token(&self.http, &self.endpoints.token_url, self.policy.request_timeout)
                .await?;
        let issued = Credential::issued(
            response,
            self.clock.now_millis(),
            self.policy.default_refresh_ttl,
        )?;
        info!("credential issued");
        Ok(self.install(state, issued))
    }

    fn install(&self, state: &mut Option<Credential>, credential: Credential) -> String {
        self.store.save(&credential);
        let access = credential.access_token.expose().clone();
        *state = Some(credential);
        access
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use common::{ManualClock, MemoryStorage, Storage};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::net::TcpListener;

    pub(crate) const NOW: u64 = 1_700_000_000_000;

    /// Token endpoints with hit counters and switchable failures.
    #[derive(Default)]
    pub(crate) struct MockAuth {
        pub issued: AtomicU64,
        pub refreshed: AtomicU64,
        pub reject_refresh: AtomicBool,
        pub fail_issue: AtomicBool,
        pub omit_refresh_token: AtomicBool,
    }

    async fn issue(State(mock): State<Arc<MockAuth>>) -> axum::response::Response {
        let n = mock.issued.fetch_add(1, Ordering::SeqCst) + 1;
        if mock.fail_issue.load(Ordering::SeqCst) {
            return (StatusCode::SERVICE_UNAVAILABLE, "down").into_response();
        }
        Json(serde_json::json!({
            "access_token": format!("at_issued_{n}"),
            "refresh_token": format!("rt_issued_{n}"),
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_expires_in": 7 * 24 * 3600,
        }))
        .into_response()
    }

    async fn refresh(
        State(mock): State<Arc<MockAuth>>,
        Json(_body): Json<serde_json::Value>,
    ) -> axum::response::Response {
        let n = mock.refreshed.fetch_add(1, Ordering::SeqCst) + 1;
        if mock.reject_refresh.load(Ordering::SeqCst) {
            return (StatusCode::UNAUTHORIZED, "refresh token revoked").into_response();
        }
        let mut body = serde_json::json!({
            "access_token": format!("at_refreshed_{n}"),
            "token_type": "Bearer",
            "expires_in": 3600,
        });
        if !mock.omit_refresh_token.load(Ordering::SeqCst) {
            body["refresh_token"] = serde_json::json!(format!("rt_refreshed_{n}"));
            body["refresh_expires_in"] = serde_json::json!(7 * 24 * 3600);
        }
        Json(body).into_response()
    }

    /// Start the mock token endpoints, returning their base URL.
    pub(crate) async fn start_auth_server(mock: Arc<MockAuth>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/api/token", post(issue))
            .route("/auth/refresh", post(refresh))
            .with_state(mock);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url
    }

    pub(crate) struct Harness {
        pub session: Arc<SessionManager>,
        pub mock: Arc<MockAuth>,
        pub clock: Arc<ManualClock>,
        pub storage: Arc<MemoryStorage>,
    }

    pub(crate) async fn harness(seed: Option<Credential>) -> Harness {
        let mock = Arc::new(MockAuth::default());
        let base = start_auth_server(mock.clone()).await;
        let clock = Arc::new(ManualClock::new(NOW));
        let storage = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(storage.clone(), clock.clone());
        if let Some(credential) = seed {
            store.save(&credential);
        }
        let session = Arc::new(SessionManager::new(
            store,
            reqwest::Client::new(),
            AuthEndpoints::new(&base, &base),
            SessionPolicy::default(),
            clock.clone(),
        ));
        Harness {
            session,
            mock,
            clock,
            storage,
        }
    }

    fn seeded(access_expires_at: u64, refresh_expires_at: u64) -> Credential {
        Credential::new(
            "at_seed".into(),
            "rt_seed".into(),
            access_expires_at,
            refresh_expires_at,
        )
    }

    #[test]
    fn endpoints_join_paths_without_double_slash() {
        let endpoints = AuthEndpoints::new("https://school.example/", "https://api.school.example/v1/");
        assert_eq!(endpoints.token_url, "https://school.example/api/token");
        assert_eq!(endpoints.refresh_url, "https://api.school.example/v1/auth/refresh");
    }

    #[tokio::test]
    async fn first_use_issues_and_persists() {
        let h = harness(None).await;
        let token = h.session.access_token().await.unwrap();
        assert_eq!(token, "at_issued_1");
        assert_eq!(h.mock.issued.load(Ordering::SeqCst), 1);
        assert_eq!(h.storage.get("access_token").as_deref(), Some("at_issued_1"));

        // Second call reuses the credential
        let again = h.session.access_token().await.unwrap();
        assert_eq!(again, "at_issued_1");
        assert_eq!(h.mock.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restores_credential_from_store() {
        let h = harness(Some(seeded(NOW + 3_600_000, NOW + 86_400_000 * 7))).await;
        assert_eq!(h.session.access_token().await.unwrap(), "at_seed");
        assert_eq!(h.mock.issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn request_inside_margin_refreshes_first() {
        let expires = NOW + 3_600_000;
        let h = harness(Some(seeded(expires, NOW + 86_400_000 * 7))).await;

        // One millisecond before the margin opens: no refresh
        h.clock.set(expires - 300_001);
        assert_eq!(h.session.access_token().await.unwrap(), "at_seed");
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 0);

        // At the margin: refresh before returning
        h.clock.set(expires - 300_000);
        let token = h.session.access_token().await.unwrap();
        assert_eq!(token, "at_refreshed_1");
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 1);

        let credential = h.session.credential().await.unwrap();
        assert!(credential.access_expires_at > h.clock.now_millis());
    }

    #[tokio::test]
    async fn expired_access_token_refreshes_and_preserves_refresh_token() {
        let h = harness(Some(seeded(NOW - 1, NOW + 86_400_000 * 7))).await;
        h.mock.omit_refresh_token.store(true, Ordering::SeqCst);

        let token = h.session.access_token().await.unwrap();
        assert_eq!(token, "at_refreshed_1");
        let credential = h.session.credential().await.unwrap();
        assert_eq!(credential.refresh_token.expose(), "rt_seed");
        assert_eq!(credential.refresh_expires_at, NOW + 86_400_000 * 7);
        assert!(credential.access_expires_at > NOW);
    }

    #[tokio::test]
    async fn rejected_refresh_falls_back_to_issuance() {
        let h = harness(Some(seeded(NOW - 1, NOW + 86_400_000 * 7))).await;
        h.mock.reject_refresh.store(true, Ordering::SeqCst);

        let token = h.session.access_token().await.unwrap();
        assert_eq!(token, "at_issued_1");
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(h.mock.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_refresh_token_skips_refresh_call() {
        let h = harness(Some(seeded(NOW + 1_000, NOW + 2_000))).await;
        h.clock.set(NOW + 5_000);

        let token = h.session.access_token().await.unwrap();
        assert_eq!(token, "at_issued_1");
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn issuance_failure_is_reported() {
        let h = harness(None).await;
        h.mock.fail_issue.store(true, Ordering::SeqCst);
        let result = h.session.access_token().await;
        assert!(matches!(
            result,
            Err(Error::TokenExchange { status: 503, .. })
        ));
        assert!(h.session.credential().await.is_none());
    }

    #[tokio::test]
    async fn force_refresh_skips_when_token_already_replaced() {
        let h = harness(Some(seeded(NOW + 3_600_000, NOW + 86_400_000 * 7))).await;

        let replaced = h.session.force_refresh("at_seed").await.unwrap();
        assert_eq!(replaced, "at_refreshed_1");

        // A second caller that saw the same rejected token gets the new one
        let current = h.session.force_refresh("at_seed").await.unwrap();
        assert_eq!(current, "at_refreshed_1");
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reauthenticate_discards_and_issues() {
        let h = harness(Some(seeded(NOW + 3_600_000, NOW + 86_400_000 * 7))).await;
        let token = h.session.reauthenticate().await.unwrap();
        assert_eq!(token, "at_issued_1");
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_clears_memory_and_storage() {
        let h = harness(None).await;
        h.session.access_token().await.unwrap();
        h.session.logout().await;
        assert!(h.session.credential().await.is_none());
        assert!(h.storage.keys().is_empty());
    }

    #[tokio::test]
    async fn renew_if_due_only_near_refresh_expiry() {
        let refresh_expires = NOW + 3 * 86_400_000;
        let h = harness(Some(seeded(NOW + 3_600_000, refresh_expires))).await;

        assert!(!h.session.renew_if_due().await.unwrap());
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 0);

        h.clock.set(refresh_expires - 86_400_000);
        assert!(h.session.renew_if_due().await.unwrap());
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 1);
        let credential = h.session.credential().await.unwrap();
        assert_eq!(credential.refresh_token.expose(), "rt_refreshed_1");
    }

    #[tokio::test]
    async fn renew_if_due_is_noop_while_unissued() {
        let h = harness(None).await;
        assert!(!h.session.renew_if_due().await.unwrap());
        assert_eq!(h.mock.issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let h = harness(Some(seeded(NOW - 1, NOW + 86_400_000 * 7))).await;

        let mut handles = vec![];
        for _ in 0..5 {
            let session = h.session.clone();
            handles.push(tokio::spawn(async move { session.access_token().await.unwrap() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "at_refreshed_1");
        }
        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 1);
    }
}
