//! Proactive background credential renewal
//!
//! Spawns a periodic task that asks the session manager whether the refresh
//! token is close to expiry and renews it if so. Interactive requests then
//! rarely pay for a synchronous refresh. The task runs independently of the
//! request path and at most one runs per session manager.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionManager;

impl SessionManager {
    /// Start the renewal task at the policy's interval.
    ///
    /// Idempotent: returns `false` without spawning when a task started by
    /// an earlier call is still running.
    pub fn spawn_renewal(self: &Arc<Self>) -> bool {
        let interval = self.policy().renewal_interval;
        self.spawn_renewal_every(interval)
    }

    /// Start the renewal task with an explicit interval.
    pub fn spawn_renewal_every(self: &Arc<Self>, interval: Duration) -> bool {
        let mut slot = self.renewal.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|cancel| !cancel.is_cancelled()) {
            debug!("renewal task already running");
            return false;
        }

        let cancel = CancellationToken::new();
        *slot = Some(cancel.clone());
        drop(slot);

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Skip the immediate first tick: the credential was just loaded
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match session.renew_if_due().await {
                    Ok(true) => info!("background credential renewal succeeded"),
                    Ok(false) => debug!("credential renewal not due"),
                    Err(e) => {
                        warn!(error = %e, "background renewal failed, will retry next cycle")
                    }
                }
            }
            debug!("renewal task stopped");
        });

        info!(interval_secs = interval.as_secs(), "renewal task started");
        true
    }

    /// Stop the renewal task, if one is running.
    pub fn stop_renewal(&self) {
        let slot = self.renewal.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cancel) = slot.as_ref() {
            cancel.cancel();
        }
    }

    pub fn renewal_running(&self) -> bool {
        let slot = self.renewal.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(|cancel| !cancel.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use crate::credentials::Credential;
    use crate::session::tests::{NOW, harness};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_is_idempotent() {
        let h = harness(None).await;
        assert!(h.session.spawn_renewal());
        assert!(!h.session.spawn_renewal());
        assert!(h.session.renewal_running());

        h.session.stop_renewal();
        assert!(!h.session.renewal_running());

        // After stopping, a new task may be started
        assert!(h.session.spawn_renewal());
        h.session.stop_renewal();
    }

    #[tokio::test]
    async fn renews_refresh_token_nearing_expiry() {
        // Refresh token expires in 12 hours: inside the one-day margin
        let h = harness(Some(Credential::new(
            "at_seed".into(),
            "rt_seed".into(),
            NOW + 3_600_000,
            NOW + 12 * 3_600_000,
        )))
        .await;

        assert!(h.session.spawn_renewal_every(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.session.stop_renewal();

        assert!(h.mock.refreshed.load(Ordering::SeqCst) >= 1);
        let credential = h.session.credential().await.unwrap();
        assert!(credential.refresh_token.expose().starts_with("rt_refreshed_"));
    }

    #[tokio::test]
    async fn leaves_healthy_credential_alone() {
        let h = harness(Some(Credential::new(
            "at_seed".into(),
            "rt_seed".into(),
            NOW + 3_600_000,
            NOW + 7 * 86_400_000,
        )))
        .await;

        assert!(h.session.spawn_renewal_every(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.session.stop_renewal();

        assert_eq!(h.mock.refreshed.load(Ordering::SeqCst), 0);
        assert_eq!(h.mock.issued.load(Ordering::SeqCst), 0);
    }
}
