//! Client error taxonomy
//!
//! Every failure of a logical call is one of these variants, carried inside
//! a failure `Envelope` rather than returned as `Err`. `AuthRequired` is the
//! single variant both recovery layers match on: the orchestrator produces it
//! for a transport 401 it could not recover from, for a credential the token
//! endpoint rejected, and for response bodies whose message names a missing
//! or invalid session.

use std::time::Duration;

/// Why a call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("{message}")]
    Application { status: u16, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the orchestrator's backoff loop may try again.
    ///
    /// Application errors are retried only when they came with a non-2xx
    /// status; a 2xx body reporting `success: false` is a final answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout(_) => true,
            ClientError::Application { status, .. } => !(200..300).contains(status),
            _ => false,
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, ClientError::AuthRequired(_))
    }
}

/// Only a rejected or expired credential means the session is gone. An
/// unavailable token endpoint is an outage and retries like any other.
impl From<campus_auth::Error> for ClientError {
    fn from(err: campus_auth::Error) -> Self {
        use campus_auth::Error as AuthError;

        match err {
            AuthError::Http(message) => ClientError::Transport(message),
            AuthError::TokenExchange { status, message } => {
                ClientError::Application { status, message }
            }
            AuthError::MalformedResponse(message) => ClientError::Decode(message),
            err @ (AuthError::InvalidCredentials(_) | AuthError::RefreshExpired) => {
                ClientError::AuthRequired(err.to_string())
            }
        }
    }
}
