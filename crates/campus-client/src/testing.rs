//! Mock token and content API for the client tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use campus_auth::{AuthEndpoints, Credential, SessionManager, SessionPolicy, TokenStore};
use campus_cache::{CacheConfig, ResponseCache};
use common::{ManualClock, MemoryStorage};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::descriptor::RequestDefaults;
use crate::orchestrator::Orchestrator;

pub(crate) const NOW: u64 = 1_700_000_000_000;

/// Hit counters per route plus knobs that switch failure modes.
#[derive(Default)]
pub(crate) struct MockApi {
    pub issued: AtomicU64,
    /// `/api/token` answers 503 while set
    pub issuance_down: AtomicBool,
    pub refreshed: AtomicU64,
    pub gallery: AtomicU64,
    pub flaky: AtomicU64,
    /// `/flaky` answers 503 until it has been hit more than this many times
    pub flaky_failures: AtomicU64,
    pub down: AtomicU64,
    pub always_401: AtomicU64,
    pub fresh_only: AtomicU64,
    pub slow: AtomicU64,
    pub sentinel: AtomicU64,
    /// `/sentinel` answers with a session sentinel this many more times
    pub sentinel_remaining: AtomicU64,
    pub admissions: AtomicU64,
}

type Api = State<Arc<MockApi>>;

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

fn authorization(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"message": "Unauthenticated."})),
    )
        .into_response()
}

async fn issue(State(api): Api) -> Response {
    let n = bump(&api.issued);
    if api.issuance_down.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "issuance unavailable").into_response();
    }
    Json(json!({
        "access_token": format!("at_issued_{n}"),
        "refresh_token": format!("rt_issued_{n}"),
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_expires_in": 7 * 24 * 3600,
    }))
    .into_response()
}

async fn refresh(State(api): Api, Json(_body): Json<Value>) -> Json<Value> {
    let n = bump(&api.refreshed);
    Json(json!({
        "data": {
            "access_token": format!("at_refreshed_{n}"),
            "token_type": "Bearer",
            "expires_in": 3600,
        }
    }))
}

async fn gallery(State(api): Api) -> Json<Value> {
    let n = bump(&api.gallery);
    Json(json!({"success": true, "data": {"hit": n}}))
}

async fn flaky(State(api): Api) -> Response {
    let n = bump(&api.flaky);
    if n <= api.flaky_failures.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"message": "maintenance"})),
        )
            .into_response();
    }
    Json(json!({"success": true, "data": {"attempt": n}})).into_response()
}

async fn down(State(api): Api) -> Response {
    bump(&api.down);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"message": "maintenance"})),
    )
        .into_response()
}

async fn always_401(State(api): Api) -> Response {
    bump(&api.always_401);
    unauthenticated()
}

/// Accepts only refreshed access tokens.
async fn fresh_only(State(api): Api, headers: HeaderMap) -> Response {
    bump(&api.fresh_only);
    if !authorization(&headers).starts_with("Bearer at_refreshed_") {
        return unauthenticated();
    }
    Json(json!({"success": true, "data": {"ok": true}})).into_response()
}

async fn slow(State(api): Api) -> Json<Value> {
    bump(&api.slow);
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!({"success": true, "data": {"slow": true}}))
}

async fn sentinel(State(api): Api) -> Json<Value> {
    bump(&api.sentinel);
    let remaining = api.sentinel_remaining.load(Ordering::SeqCst);
    if remaining > 0 {
        api.sentinel_remaining.store(remaining - 1, Ordering::SeqCst);
        return Json(json!({"success": false, "message": "Unauthenticated."}));
    }
    Json(json!({"success": true, "data": {"ok": true}}))
}

/// Echoes the caller's credential and query in a paginated resource.
async fn news(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let page: u64 = query
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);
    let mut data = json!({"authorization": authorization(&headers)});
    for (k, v) in &query {
        data[k] = json!(v);
    }
    Json(json!({
        "success": true,
        "data": {
            "data": data,
            "meta": {"current_page": page, "last_page": 3, "total": 25, "from": 1, "to": 10},
            "links": {"first": "/news?page=1", "last": "/news?page=3"}
        }
    }))
}

async fn admissions(State(api): Api, Json(body): Json<Value>) -> Response {
    bump(&api.admissions);
    if body["name"].as_str().unwrap_or_default().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "message": "The name field is required.",
                "errors": {"name": ["The name field is required."]}
            })),
        )
            .into_response();
    }
    Json(json!({"success": true, "message": "Application received", "data": body}))
        .into_response()
}

/// Start the mock API, returning its base URL.
pub(crate) async fn start_api(api: Arc<MockApi>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/api/token", post(issue))
        .route("/auth/refresh", post(refresh))
        .route("/gallery", get(gallery))
        .route("/flaky", get(flaky))
        .route("/down", get(down))
        .route("/always-401", get(always_401))
        .route("/fresh-only", get(fresh_only))
        .route("/slow", get(slow))
        .route("/sentinel", get(sentinel))
        .route("/news", get(news))
        .route("/admissions", post(admissions))
        .with_state(api);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    url
}

pub(crate) struct Fixture {
    pub api: Arc<MockApi>,
    pub orchestrator: Arc<Orchestrator>,
    pub clock: Arc<ManualClock>,
}

/// Orchestrator over the mock API with short backoff and a manual clock.
pub(crate) async fn fixture() -> Fixture {
    fixture_with(None).await
}

/// Like `fixture`, with `seed` already in the token store.
pub(crate) async fn fixture_with(seed: Option<Credential>) -> Fixture {
    let api = Arc::new(MockApi::default());
    let base = start_api(api.clone()).await;
    let clock = Arc::new(ManualClock::new(NOW));
    let storage = Arc::new(MemoryStorage::new());
    let http = reqwest::Client::new();

    let store = TokenStore::new(storage.clone(), clock.clone());
    if let Some(credential) = seed {
        store.save(&credential);
    }
    let session = Arc::new(SessionManager::new(
        store,
        http.clone(),
        AuthEndpoints::new(&base, &base),
        SessionPolicy::default(),
        clock.clone(),
    ));
    let cache = Arc::new(ResponseCache::new(
        storage,
        clock.clone(),
        CacheConfig::default(),
    ));
    let orchestrator = Orchestrator::new(http, base, session, cache).with_defaults(RequestDefaults {
        timeout: Duration::from_secs(2),
        retries: 2,
        base_delay: Duration::from_millis(10),
    });

    Fixture {
        api,
        orchestrator: Arc::new(orchestrator),
        clock,
    }
}
