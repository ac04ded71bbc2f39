//! Common types for the campus API layer
//!
//! Shared by the auth, cache and client crates: the error type, the
//! `Secret` wrapper for tokens, the key/value `Storage` seam both the token
//! store and the response cache persist through, and the `Clock` seam that
//! every expiry decision reads time from.

mod clock;
mod error;
mod secret;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock, millis};
pub use error::{Error, Result};
pub use secret::Secret;
pub use storage::{FileStorage, MemoryStorage, Storage};
