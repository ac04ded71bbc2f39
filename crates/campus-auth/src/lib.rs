//! Credential lifecycle for the campus content API
//!
//! Owns the access/refresh token pair: issuing it from the site's token
//! route, refreshing it against the content API, persisting it through the
//! `TokenStore`, and renewing it in the background before it expires. This
//! crate has no dependency on the request path and can be tested on its own.
//!
//! Credential flow:
//! 1. First caller of `SessionManager::access_token()` triggers issuance
//!    (`token::issue_token`) and the result is saved via `TokenStore::save()`
//! 2. Calls within `SessionPolicy::access_margin` of access expiry refresh
//!    inline (`token::refresh_token`); a failed refresh falls back to issuance
//! 3. `SessionManager::spawn_renewal()` runs the hourly proactive check
//!    against the refresh token's expiry
//! 4. `logout()` or an unrecoverable failure clears the stored records

pub mod constants;
pub mod credentials;
pub mod error;
mod renewal;
pub mod session;
pub mod token;

pub use credentials::{Credential, TokenStore};
pub use error::{Error, Result};
pub use session::{AuthEndpoints, SessionManager, SessionPolicy};
pub use token::{TokenResponse, issue_token, refresh_token};
