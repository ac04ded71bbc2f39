//! Token issuance and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Issuance: `POST {site}/api/token` with no body, served by the hosting
//!    site's own backend rather than the content API
//! 2. Refresh: `POST {api}/auth/refresh` with `{ "refresh_token": .. }`
//!
//! Both return the same token shape, either flat or wrapped in a
//! `{ "data": { .. } }` envelope. The wrapping is removed here so callers
//! only ever see a `TokenResponse`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Response from both token endpoints.
///
/// `expires_in` and `refresh_expires_in` are deltas in seconds from the
/// response time. A refresh response may omit the refresh token, in which
/// case the previous one stays valid.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: u64,
    /// Seconds until the refresh token expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenPayload {
    Wrapped { data: TokenResponse },
    Flat(TokenResponse),
}

impl From<TokenPayload> for TokenResponse {
    fn from(payload: TokenPayload) -> Self {
        match payload {
            TokenPayload::Wrapped { data } => data,
            TokenPayload::Flat(token) => token,
        }
    }
}

/// Request a brand-new credential pair.
pub async fn issue_token(
    client: &reqwest::Client,
    token_url: &str,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = client
        .post(token_url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token issuance request failed: {e}")))?;

    read_token_response(response, "issuance").await
}

/// Exchange a refresh token for a new access token.
///
/// Called inline when a request finds its access token near expiry, after a
/// 401 from the content API, and by the background renewal task.
pub async fn refresh_token(
    client: &reqwest::Client,
    refresh_url: &str,
    refresh: &str,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = client
        .post(refresh_url)
        .timeout(timeout)
        .json(&serde_json::json!({ "refresh_token": refresh }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    read_token_response(response, "refresh").await
}

async fn read_token_response(response: reqwest::Response, what: &str) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403 means the presented refresh token is revoked or invalid
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "{what} rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange {
            status: status.as_u16(),
            message: format!("{what} returned {status}: {body}"),
        });
    }

    let token: TokenResponse = response
        .json::<TokenPayload>()
        .await
        .map_err(|e| Error::MalformedResponse(format!("invalid {what} response: {e}")))?
        .into();

    if token.expires_in == 0 {
        return Err(Error::MalformedResponse(format!(
            "{what} response has zero expires_in"
        )));
    }
    Ok(token)
}
