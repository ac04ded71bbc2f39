//! Per-consumer fetch binding
//!
//! A binding owns one subscription's `BindingState` and publishes every
//! change through a `watch` channel. Each call runs under a child of the
//! binding's root cancellation token: starting a new call cancels the
//! previous one, and teardown cancels the root. State is only written while
//! holding the subscription lock and only if the call's token is still live,
//! so a cancelled or torn-down call never mutates state afterwards.
//!
//! Bindings add the second auth recovery layer: an envelope carrying
//! `AuthRequired` triggers one re-authentication and one retry of the whole
//! call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::descriptor::RequestDescriptor;
use crate::envelope::{Envelope, PageLinks, PageMeta};
use crate::error::ClientError;
use crate::metrics;
use crate::orchestrator::Orchestrator;

/// What a consumer renders from.
#[derive(Debug, Clone)]
pub struct BindingState<T> {
    pub data: Option<T>,
    pub meta: Option<PageMeta>,
    pub links: Option<PageLinks>,
    pub loading: bool,
    pub error: Option<ClientError>,
    pub stale: bool,
}

impl<T> Default for BindingState<T> {
    fn default() -> Self {
        Self {
            data: None,
            meta: None,
            links: None,
            loading: false,
            error: None,
            stale: false,
        }
    }
}

/// Cancellation and state plumbing shared by fetch and mutation bindings.
pub(crate) struct Subscription<T> {
    state: watch::Sender<BindingState<T>>,
    root: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

impl<T: Clone> Subscription<T> {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(BindingState::default());
        Self {
            state,
            root: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// Cancel the in-flight call, if any, and hand out a token for the next.
    ///
    /// Returns `None` once the subscription is torn down.
    pub(crate) fn begin(&self) -> Option<CancellationToken> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if self.root.is_cancelled() {
            return None;
        }
        let token = self.root.child_token();
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        Some(token)
    }

    /// Apply `f` unless `token` has been cancelled. Returns whether it ran.
    pub(crate) fn update(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut BindingState<T>),
    ) -> bool {
        let _current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if token.is_cancelled() {
            return false;
        }
        self.state.send_modify(f);
        true
    }

    /// Fold a finished call into state.
    ///
    /// Success replaces the data; failure keeps the previous data and
    /// records the error.
    pub(crate) fn settle(&self, token: &CancellationToken, envelope: &Envelope<T>) -> bool {
        self.update(token, |state| {
            state.loading = false;
            if envelope.success {
                state.data = envelope.data.clone();
                state.meta = envelope.meta.clone();
                state.links = envelope.links.clone();
                state.stale = envelope.stale;
                state.error = None;
            } else {
                state.error = envelope.error.clone();
            }
        })
    }

    pub(crate) fn snapshot(&self) -> BindingState<T> {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<BindingState<T>> {
        self.state.subscribe()
    }

}

impl<T> Subscription<T> {
    pub(crate) fn teardown(&self) {
        let _current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        self.root.cancel();
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

/// Execute with the binding-level recovery: one re-authentication and one
/// retry when the envelope reports `AuthRequired`.
pub(crate) async fn execute_with_recovery(
    orchestrator: &Orchestrator,
    descriptor: &RequestDescriptor,
    cancel: &CancellationToken,
) -> Envelope<Value> {
    let envelope = orchestrator.execute(descriptor, cancel).await;
    if !envelope.is_auth_required() || cancel.is_cancelled() {
        return envelope;
    }

    info!(endpoint = %descriptor.endpoint, "session rejected, re-authenticating once");
    metrics::record_auth_recovery("binding");
    let reauth = tokio::select! {
        _ = cancel.cancelled() => return Envelope::failure(ClientError::Cancelled),
        result = orchestrator.session().reauthenticate() => result,
    };
    if let Err(e) = reauth {
        warn!(error = %e, "re-authentication failed");
        return envelope;
    }
    orchestrator.execute(descriptor, cancel).await
}

/// Options for a fetch binding.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub params: BTreeMap<String, String>,
    pub cacheable: bool,
    /// Cache lifetime; the cache default applies when unset
    pub ttl: Option<Duration>,
    /// Spawn the first fetch on construction
    pub auto_start: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            params: BTreeMap::new(),
            cacheable: true,
            ttl: None,
            auto_start: true,
        }
    }
}

struct FetchInner<T> {
    orchestrator: Arc<Orchestrator>,
    descriptor: RequestDescriptor,
    subscription: Subscription<T>,
}

impl<T> FetchInner<T>
where
    T: DeserializeOwned + Clone,
{
    async fn refetch(&self) -> Envelope<T> {
        let Some(token) = self.subscription.begin() else {
            return Envelope::failure(ClientError::Cancelled);
        };
        self.subscription.update(&token, |state| {
            state.loading = true;
            state.error = None;
        });

        let envelope = execute_with_recovery(&self.orchestrator, &self.descriptor, &token)
            .await
            .decode::<T>();

        if !self.subscription.settle(&token, &envelope) {
            debug!(endpoint = %self.descriptor.endpoint, "discarding result of cancelled fetch");
        }
        envelope
    }
}

/// Read binding for one endpoint.
///
/// Dropping the binding tears it down.
pub struct FetchBinding<T> {
    inner: Arc<FetchInner<T>>,
}

impl<T> FetchBinding<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a binding. With `auto_start` the first fetch is spawned on the
    /// current tokio runtime.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        endpoint: impl Into<String>,
        options: FetchOptions,
    ) -> Self {
        let descriptor = orchestrator
            .request(Method::GET, endpoint)
            .params(options.params)
            .cacheable(options.cacheable)
            .ttl(options.ttl);
        let binding = Self {
            inner: Arc::new(FetchInner {
                orchestrator,
                descriptor,
                subscription: Subscription::new(),
            }),
        };
        if options.auto_start {
            binding.start();
        }
        binding
    }

    /// Spawn a fetch in the background.
    pub fn start(&self) -> JoinHandle<Envelope<T>> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.refetch().await })
    }

    /// Fetch now, cancelling any call still in flight.
    pub async fn refetch(&self) -> Envelope<T> {
        self.inner.refetch().await
    }

    pub fn state(&self) -> BindingState<T> {
        self.inner.subscription.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<BindingState<T>> {
        self.inner.subscription.subscribe()
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.inner.descriptor
    }

    /// Drop this binding's cached entry so the next fetch goes to network.
    pub fn clear_cache(&self) {
        self.inner
            .orchestrator
            .cache()
            .remove(&self.inner.descriptor.cache_key());
    }

    /// Cancel any in-flight call and stop all further state changes.
    pub fn teardown(&self) {
        self.inner.subscription.teardown();
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.subscription.is_torn_down()
    }
}

impl<T> Drop for FetchBinding<T> {
    fn drop(&mut self) {
        self.inner.subscription.teardown();
    }
}
