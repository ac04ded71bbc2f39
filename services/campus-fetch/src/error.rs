//! Service-specific error types

use thiserror::Error;

/// Argument value errors surfaced through clap. Everything past argument
/// parsing is reported through the printed `Envelope` instead.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid --param {0:?}: expected key=value")]
    InvalidParam(String),

    #[error("invalid --body: {0}")]
    InvalidBody(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
