//! Error types for credential operations

/// Errors from issuing or refreshing credentials.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The token endpoint answered with a status other than 401/403.
    #[error("token exchange failed with status {status}: {message}")]
    TokenExchange { status: u16, message: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("refresh token expired")]
    RefreshExpired,
}

impl Error {
    /// Whether the failure came from the network rather than the token endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
