//! Credential record and its persistent store
//!
//! A credential is persisted as four scalar records (both tokens and both
//! expiries). The four are always written and read as one unit: a load that
//! finds only some of them treats the credential as absent and removes the
//! leftovers, so a crash between writes can never surface a mixed pair.
//!
//! Writes are best-effort. A storage failure is logged and swallowed; the
//! session manager's in-memory copy stays authoritative for the process.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, Secret, Storage, millis};
use tracing::{debug, warn};

use crate::constants::{
    ACCESS_EXPIRES_KEY, ACCESS_TOKEN_KEY, REFRESH_EXPIRES_KEY, REFRESH_TOKEN_KEY,
};
use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// The access/refresh token pair and their expiry instants.
///
/// Expiries are unix timestamps in milliseconds. `access_expires_at` never
/// exceeds `refresh_expires_at`; constructors clamp it.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub access_expires_at: u64,
    pub refresh_expires_at: u64,
}

impl Credential {
    pub fn new(
        access_token: String,
        refresh_token: String,
        access_expires_at: u64,
        refresh_expires_at: u64,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            access_expires_at: access_expires_at.min(refresh_expires_at),
            refresh_expires_at,
        }
    }

    /// Build a credential from an issuance response received at `now`.
    ///
    /// Issuance must return a refresh token. `default_refresh_ttl` applies
    /// when the response does not say how long it lives.
    pub fn issued(token: TokenResponse, now: u64, default_refresh_ttl: Duration) -> Result<Self> {
        let refresh = token.refresh_token.ok_or_else(|| {
            Error::MalformedResponse("issuance response has no refresh_token".into())
        })?;
        let refresh_ttl_ms = token
            .refresh_expires_in
            .map_or(millis(default_refresh_ttl), secs_to_millis);
        Ok(Self::new(
            token.access_token,
            refresh,
            now.saturating_add(secs_to_millis(token.expires_in)),
            now.saturating_add(refresh_ttl_ms),
        ))
    }

    /// Apply a refresh response received at `now`.
    ///
    /// When the response omits a refresh token the current one, and its
    /// expiry, are kept.
    pub fn refreshed(&self, token: TokenResponse, now: u64, default_refresh_ttl: Duration) -> Self {
        let access_expires_at = now.saturating_add(secs_to_millis(token.expires_in));
        match token.refresh_token {
            Some(refresh) => {
                let refresh_ttl_ms = token
                    .refresh_expires_in
                    .map_or(millis(default_refresh_ttl), secs_to_millis);
                Self::new(
                    token.access_token,
                    refresh,
                    access_expires_at,
                    now.saturating_add(refresh_ttl_ms),
                )
            }
            None => Self::new(
                token.access_token,
                self.refresh_token.expose().clone(),
                access_expires_at,
                self.refresh_expires_at,
            ),
        }
    }

    /// Whether the access token is expired or expires within `margin`.
    pub fn access_expires_within(&self, now: u64, margin: Duration) -> bool {
        now.saturating_add(millis(margin)) >= self.access_expires_at
    }

    /// Whether the refresh token is expired or expires within `margin`.
    pub fn refresh_expires_within(&self, now: u64, margin: Duration) -> bool {
        now.saturating_add(millis(margin)) >= self.refresh_expires_at
    }

    pub fn refresh_expired(&self, now: u64) -> bool {
        now >= self.refresh_expires_at
    }
}

/// Server-supplied lifetimes are untrusted; absurd values pin to the far future.
fn secs_to_millis(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

/// Durable storage of the current credential.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Read the stored credential.
    ///
    /// Returns `None` when nothing is stored, when only part of the four
    /// records exists, or when the refresh token has expired. The last two
    /// cases also clear the records.
    pub fn load(&self) -> Option<Credential> {
        let access = self.storage.get(ACCESS_TOKEN_KEY);
        let refresh = self.storage.get(REFRESH_TOKEN_KEY);
        let access_expires = self.storage.get(ACCESS_EXPIRES_KEY);
        let refresh_expires = self.storage.get(REFRESH_EXPIRES_KEY);

        if access.is_none()
            && refresh.is_none()
            && access_expires.is_none()
            && refresh_expires.is_none()
        {
            return None;
        }

        let parsed = (|| {
            Some(Credential::new(
                access?,
                refresh?,
                access_expires?.parse().ok()?,
                refresh_expires?.parse().ok()?,
            ))
        })();

        let Some(credential) = parsed else {
            warn!("stored credential is incomplete, discarding");
            self.clear();
            return None;
        };

        if credential.refresh_expired(self.clock.now_millis()) {
            debug!("stored credential has an expired refresh token, discarding");
            self.clear();
            return None;
        }

        Some(credential)
    }

    /// Persist a credential, replacing the previous one.
    ///
    /// If any of the four writes fails the records are cleared so a later
    /// load does not pair the new access token with the old refresh token.
    pub fn save(&self, credential: &Credential) {
        let records = [
            (ACCESS_TOKEN_KEY, credential.access_token.expose().clone()),
            (REFRESH_TOKEN_KEY, credential.refresh_token.expose().clone()),
            (ACCESS_EXPIRES_KEY, credential.access_expires_at.to_string()),
            (REFRESH_EXPIRES_KEY, credential.refresh_expires_at.to_string()),
        ];
        for (key, value) in &records {
            if let Err(e) = self.storage.set(key, value) {
                warn!(key, error = %e, "failed to persist credential, clearing stored records");
                self.clear();
                return;
            }
        }
        debug!("persisted credential");
    }

    /// Remove all four credential records.
    pub fn clear(&self) {
        for key in [
            ACCESS_TOKEN_KEY,
            REFRESH_TOKEN_KEY,
            ACCESS_EXPIRES_KEY,
            REFRESH_EXPIRES_KEY,
        ] {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, error = %e, "failed to remove credential record");
            }
        }
    }
}
