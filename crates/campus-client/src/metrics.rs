//! Client-side counters
//!
//! - `campus_requests_total` (counter): label `outcome` (`fresh`, `cached`, `stale`, `failed`, `cancelled`)
//! - `campus_cache_hits_total` (counter)
//! - `campus_retries_total` (counter)
//! - `campus_auth_recoveries_total` (counter): label `layer` (`orchestrator`, `binding`)
//!
//! All calls are no-ops until the embedding process installs a recorder.

/// Record the terminal outcome of one orchestrated call.
pub fn record_outcome(outcome: &'static str) {
    metrics::counter!("campus_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_hit() {
    metrics::counter!("campus_cache_hits_total").increment(1);
}

pub fn record_retry() {
    metrics::counter!("campus_retries_total").increment(1);
}

/// Record one auth recovery attempt at the given layer.
pub fn record_auth_recovery(layer: &'static str) {
    metrics::counter!("campus_auth_recoveries_total", "layer" => layer).increment(1);
}
