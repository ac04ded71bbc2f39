//! campus-fetch
//!
//! Command-line consumer of the campus content API:
//! 1. Loads configuration and opens the on-disk credential and cache store
//! 2. Restores or issues a credential and starts background renewal
//! 3. Runs one fetch or mutation through a binding
//! 4. Prints the resulting envelope as JSON and exits non-zero on failure

mod cli;
mod config;
mod error;
mod metrics;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use campus_auth::{SessionManager, TokenStore};
use campus_cache::ResponseCache;
use campus_client::{
    ClientError, Envelope, FetchBinding, FetchOptions, MutationBinding, MutationOptions,
    Orchestrator,
};
use common::{Clock, FileStorage, Storage, SystemClock};
use reqwest::Method;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{CallArgs, Cli};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // JSON logs on stderr so stdout carries only the envelope
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let prometheus = if cli.metrics {
        Some(metrics::install_recorder().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    info!(path = %cli.config.display(), "loading configuration");
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    info!(
        base_url = %config.api.base_url,
        storage_dir = %config.storage.dir.display(),
        "configuration loaded"
    );

    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::open(&config.storage.dir).with_context(|| {
            format!("failed to open storage at {}", config.storage.dir.display())
        })?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http = reqwest::Client::new();

    let session = Arc::new(SessionManager::new(
        TokenStore::new(storage.clone(), clock.clone()),
        http.clone(),
        config.endpoints(),
        config.session_policy(),
        clock.clone(),
    ));
    let cache = Arc::new(ResponseCache::new(storage, clock, config.cache_config()));

    let envelope = match cli.command.call() {
        None => {
            session.logout().await;
            let removed = cache.clear();
            info!(removed, "logged out");
            Envelope::ok(Value::Null)
        }
        Some((method, args)) => {
            session.spawn_renewal();
            let orchestrator = Arc::new(
                Orchestrator::new(http, config.api.base_url.clone(), session.clone(), cache)
                    .with_defaults(config.request_defaults())
                    .with_sentinels(config.sentinels()),
            );
            let envelope = if method == Method::GET {
                fetch(orchestrator, args).await
            } else {
                mutate(orchestrator, method, args).await
            };
            session.stop_renewal();
            envelope
        }
    };

    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }

    if envelope.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn fetch(orchestrator: Arc<Orchestrator>, args: &CallArgs) -> Envelope<Value> {
    let binding: FetchBinding<Value> = FetchBinding::new(
        orchestrator,
        args.endpoint.clone(),
        FetchOptions {
            params: args.param_map(),
            cacheable: !args.no_cache,
            ttl: None,
            auto_start: false,
        },
    );
    tokio::select! {
        envelope = binding.refetch() => envelope,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling request");
            binding.teardown();
            Envelope::failure(ClientError::Cancelled)
        }
    }
}

async fn mutate(
    orchestrator: Arc<Orchestrator>,
    method: Method,
    args: &CallArgs,
) -> Envelope<Value> {
    // Reads of the same endpoint are stale once it has been written
    let binding: MutationBinding<Value> = MutationBinding::new(
        orchestrator,
        MutationOptions {
            retries: None,
            invalidate: vec![args.endpoint.clone()],
        },
    );
    tokio::select! {
        envelope = binding.mutate(method, &args.endpoint, args.body.clone()) => envelope,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling request");
            binding.teardown();
            Envelope::failure(ClientError::Cancelled)
        }
    }
}
