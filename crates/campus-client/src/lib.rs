//! Request path for the campus content API
//!
//! Every call goes through the `Orchestrator`, which consults the
//! `ResponseCache`, obtains a credential from the `SessionManager`, and
//! retries transient failures. Consumers hold a `FetchBinding` or
//! `MutationBinding` per subscription and render from its `BindingState`.
//!
//! Request flow:
//! 1. A binding builds a `RequestDescriptor` and calls `Orchestrator::execute`
//! 2. Cache hit on a cacheable read returns immediately
//! 3. Otherwise each attempt attaches a bearer token and races the request
//!    against its timeout and the caller's `CancellationToken`
//! 4. A first-attempt 401 refreshes the credential once; other failures back
//!    off exponentially up to the descriptor's retry budget
//! 5. Success is cached; final failure falls back to a stale entry or a
//!    failure `Envelope`
//! 6. A binding seeing `AuthRequired` re-authenticates once and retries

mod binding;
pub mod decode;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod metrics;
mod mutation;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use binding::{BindingState, FetchBinding, FetchOptions};
pub use decode::AuthSentinels;
pub use descriptor::{RequestDefaults, RequestDescriptor};
pub use envelope::{Envelope, PageLinks, PageMeta, Payload};
pub use error::ClientError;
pub use mutation::{MutationBinding, MutationOptions};
pub use orchestrator::Orchestrator;
pub use tokio_util::sync::CancellationToken;
