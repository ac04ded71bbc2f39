//! Write-side binding
//!
//! Same state shape, cancellation and auth recovery as `FetchBinding`, but
//! calls never consult or populate the cache. A successful mutation drops
//! the cached entries of the endpoints listed in `MutationOptions::invalidate`.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::binding::{BindingState, Subscription, execute_with_recovery};
use crate::envelope::Envelope;
use crate::error::ClientError;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// Overrides the orchestrator's retry count
    pub retries: Option<u32>,
    /// Endpoints whose cached reads become invalid after a success
    pub invalidate: Vec<String>,
}

pub struct MutationBinding<T> {
    orchestrator: Arc<Orchestrator>,
    options: MutationOptions,
    subscription: Subscription<T>,
}

impl<T> MutationBinding<T>
where
    T: DeserializeOwned + Clone,
{
    pub fn new(orchestrator: Arc<Orchestrator>, options: MutationOptions) -> Self {
        Self {
            orchestrator,
            options,
            subscription: Subscription::new(),
        }
    }

    /// Issue a write, cancelling any mutation still in flight.
    pub async fn mutate(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Envelope<T> {
        let mut descriptor = self.orchestrator.request(method, endpoint).cacheable(false);
        if let Some(body) = body {
            descriptor = descriptor.body(body);
        }
        if let Some(retries) = self.options.retries {
            descriptor = descriptor.retries(retries);
        }

        let Some(token) = self.subscription.begin() else {
            return Envelope::failure(ClientError::Cancelled);
        };
        self.subscription.update(&token, |state| {
            state.loading = true;
            state.error = None;
        });

        let envelope = execute_with_recovery(&self.orchestrator, &descriptor, &token)
            .await
            .decode::<T>();

        if envelope.success && !token.is_cancelled() {
            for endpoint in &self.options.invalidate {
                let removed = self.orchestrator.cache().invalidate_endpoint(endpoint);
                debug!(endpoint = %endpoint, removed, "invalidated cached reads");
            }
        }
        self.subscription.settle(&token, &envelope);
        envelope
    }

    pub async fn post(&self, endpoint: &str, body: Value) -> Envelope<T> {
        self.mutate(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: Value) -> Envelope<T> {
        self.mutate(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Envelope<T> {
        self.mutate(Method::DELETE, endpoint, None).await
    }

    pub fn state(&self) -> BindingState<T> {
        self.subscription.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<BindingState<T>> {
        self.subscription.subscribe()
    }

    pub fn teardown(&self) {
        self.subscription.teardown();
    }

    pub fn is_torn_down(&self) -> bool {
        self.subscription.is_torn_down()
    }
}

/// Dropping the binding tears it down, as with `FetchBinding`.
impl<T> Drop for MutationBinding<T> {
    fn drop(&mut self) {
        self.subscription.teardown();
    }
}
