//! Credential policy defaults and persisted record names
//!
//! The margins and intervals here are the defaults of `SessionPolicy`; a
//! deployment may override every one of them.

use std::time::Duration;

/// Route on the hosting site that issues a fresh credential pair.
pub const ISSUE_PATH: &str = "/api/token";

/// Route on the content API that exchanges a refresh token.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Refresh inline when the access token expires within this window.
pub const ACCESS_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Renew proactively when the refresh token expires within this window.
pub const REFRESH_RENEWAL_MARGIN: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the background renewal task wakes up.
pub const RENEWAL_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Refresh-token lifetime assumed when a token response does not state one.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Timeout for a single issue or refresh call.
pub const AUTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Storage key of the access token record.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key of the refresh token record.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key of the access expiry record (unix milliseconds).
pub const ACCESS_EXPIRES_KEY: &str = "access_token_expires_at";

/// Storage key of the refresh expiry record (unix milliseconds).
pub const REFRESH_EXPIRES_KEY: &str = "refresh_token_expires_at";
